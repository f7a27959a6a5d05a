use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Account type stored as TEXT in the accounts table
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum AccountType {
    #[sqlx(rename = "ASSET")]
    #[serde(rename = "ASSET")]
    Asset,
    #[sqlx(rename = "LIABILITY")]
    #[serde(rename = "LIABILITY")]
    Liability,
    #[sqlx(rename = "EQUITY")]
    #[serde(rename = "EQUITY")]
    Equity,
    #[sqlx(rename = "INCOME")]
    #[serde(rename = "INCOME")]
    Income,
    #[sqlx(rename = "EXPENSE")]
    #[serde(rename = "EXPENSE")]
    Expense,
}

/// Which side increases the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum NormalBalance {
    #[sqlx(rename = "DEBIT")]
    #[serde(rename = "DEBIT")]
    Debit,
    #[sqlx(rename = "CREDIT")]
    #[serde(rename = "CREDIT")]
    Credit,
}

/// Chart-of-accounts entry
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub tenant_id: String,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub report_group: Option<String>,
    pub cashflow_activity: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "id, tenant_id, code, name, account_type, normal_balance, \
     report_group, cashflow_activity, is_active, created_at";

/// Find an account by id within the tenant
pub async fn find_by_id(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {SELECT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Find an account by id within the tenant, inside a transaction
pub async fn find_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {SELECT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

/// Find an account by code within the tenant, inside a transaction
pub async fn find_by_code_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    code: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {SELECT_COLUMNS} FROM accounts WHERE tenant_id = $1 AND code = $2"
    ))
    .bind(tenant_id)
    .bind(code)
    .fetch_optional(&mut **tx)
    .await
}

/// Insert a new account and return it
pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    code: &str,
    name: &str,
    account_type: AccountType,
    normal_balance: NormalBalance,
    report_group: Option<&str>,
    cashflow_activity: Option<&str>,
) -> Result<Account, sqlx::Error> {
    let id = Uuid::new_v4();
    let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
        r#"
        INSERT INTO accounts
            (id, tenant_id, code, name, account_type, normal_balance, report_group, cashflow_activity)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING created_at
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(code)
    .bind(name)
    .bind(account_type)
    .bind(normal_balance)
    .bind(report_group)
    .bind(cashflow_activity)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Account {
        id,
        tenant_id: tenant_id.to_string(),
        code: code.to_string(),
        name: name.to_string(),
        account_type,
        normal_balance,
        report_group: report_group.map(str::to_string),
        cashflow_activity: cashflow_activity.map(str::to_string),
        is_active: true,
        created_at,
    })
}

/// Count active accounts among the given ids that belong to the tenant
///
/// Used by the ledger poster to validate every referenced account in a
/// single round trip.
pub async fn count_active_by_ids_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    ids: &[Uuid],
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(DISTINCT id)
        FROM accounts
        WHERE tenant_id = $1 AND id = ANY($2) AND is_active
        "#,
    )
    .bind(tenant_id)
    .bind(ids)
    .fetch_one(&mut **tx)
    .await?;

    Ok(count)
}

/// List all accounts for the tenant, ordered by code
pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        "SELECT {SELECT_COLUMNS} FROM accounts WHERE tenant_id = $1 ORDER BY code"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}
