use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

/// Kind of banking account; credit cards cannot receive customer payments
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum BankingKind {
    #[sqlx(rename = "BANK")]
    #[serde(rename = "BANK")]
    Bank,
    #[sqlx(rename = "CASH")]
    #[serde(rename = "CASH")]
    Cash,
    #[sqlx(rename = "CREDIT_CARD")]
    #[serde(rename = "CREDIT_CARD")]
    CreditCard,
}

impl BankingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BankingKind::Bank => "BANK",
            BankingKind::Cash => "CASH",
            BankingKind::CreditCard => "CREDIT_CARD",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BankingAccount {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub account_id: Uuid,
    pub kind: BankingKind,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn find_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<BankingAccount>, sqlx::Error> {
    sqlx::query_as::<_, BankingAccount>(
        "SELECT id, tenant_id, name, account_id, kind, is_active, created_at \
         FROM banking_accounts WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    name: &str,
    account_id: Uuid,
    kind: BankingKind,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO banking_accounts (id, tenant_id, name, account_id, kind) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(name)
    .bind(account_id)
    .bind(kind)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
