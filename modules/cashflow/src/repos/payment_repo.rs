//! Payment rows for invoices, expenses, and purchase bills
//!
//! The three payment tables share one column shape, so the repo is keyed by
//! `PaymentDocKind` and aliases the parent id column to `parent_id`.
//! Payments are created POSTED with their journal entry; reversal stamps
//! `reversed_at` plus the reversal entry id and never deletes the row.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Which document family a payment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDocKind {
    Invoice,
    Expense,
    PurchaseBill,
}

impl PaymentDocKind {
    fn table(self) -> &'static str {
        match self {
            PaymentDocKind::Invoice => "payments",
            PaymentDocKind::Expense => "expense_payments",
            PaymentDocKind::PurchaseBill => "purchase_bill_payments",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            PaymentDocKind::Invoice => "invoice_id",
            PaymentDocKind::Expense => "expense_id",
            PaymentDocKind::PurchaseBill => "purchase_bill_id",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub parent_id: Uuid,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub bank_account_id: Uuid,
    pub payment_mode: Option<String>,
    pub attachment_url: Option<String>,
    pub journal_entry_id: Uuid,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversal_journal_entry_id: Option<Uuid>,
    pub reversal_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentRow {
    pub fn is_reversed(&self) -> bool {
        self.reversed_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PaymentInsert {
    pub parent_id: Uuid,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub bank_account_id: Uuid,
    pub payment_mode: Option<String>,
    pub attachment_url: Option<String>,
    pub journal_entry_id: Uuid,
    pub created_by: String,
}

fn select_columns(kind: PaymentDocKind) -> String {
    format!(
        "id, tenant_id, {} AS parent_id, amount, payment_date, bank_account_id, payment_mode, \
         attachment_url, journal_entry_id, reversed_at, reversal_journal_entry_id, \
         reversal_reason, created_by, created_at",
        kind.parent_column()
    )
}

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    kind: PaymentDocKind,
    payment: &PaymentInsert,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    let sql = format!(
        r#"
        INSERT INTO {}
            (id, tenant_id, {}, amount, payment_date, bank_account_id, payment_mode,
             attachment_url, journal_entry_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
        kind.table(),
        kind.parent_column()
    );

    sqlx::query(&sql)
        .bind(id)
        .bind(tenant_id)
        .bind(payment.parent_id)
        .bind(payment.amount)
        .bind(payment.payment_date)
        .bind(payment.bank_account_id)
        .bind(&payment.payment_mode)
        .bind(&payment.attachment_url)
        .bind(payment.journal_entry_id)
        .bind(&payment.created_by)
        .execute(&mut **tx)
        .await?;

    Ok(id)
}

/// Row-lock a payment for reversal
pub async fn lock_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    kind: PaymentDocKind,
    payment_id: Uuid,
) -> Result<Option<PaymentRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM {} WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        select_columns(kind),
        kind.table()
    );

    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await
}

/// Sum of non-reversed payments against a document
pub async fn sum_active_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    kind: PaymentDocKind,
    parent_id: Uuid,
) -> Result<Decimal, sqlx::Error> {
    let sql = format!(
        "SELECT COALESCE(SUM(amount), 0) FROM {} \
         WHERE tenant_id = $1 AND {} = $2 AND reversed_at IS NULL",
        kind.table(),
        kind.parent_column()
    );

    let (sum,): (Decimal,) = sqlx::query_as(&sql)
        .bind(tenant_id)
        .bind(parent_id)
        .fetch_one(&mut **tx)
        .await?;

    Ok(sum)
}

/// True when any non-reversed payment exists for the document
pub async fn has_active_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    kind: PaymentDocKind,
    parent_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} \
         WHERE tenant_id = $1 AND {} = $2 AND reversed_at IS NULL)",
        kind.table(),
        kind.parent_column()
    );

    let (exists,): (bool,) = sqlx::query_as(&sql)
        .bind(tenant_id)
        .bind(parent_id)
        .fetch_one(&mut **tx)
        .await?;

    Ok(exists)
}

/// Stamp reversal metadata on the payment
pub async fn stamp_reversed_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    kind: PaymentDocKind,
    payment_id: Uuid,
    reversal_journal_entry_id: Uuid,
    reversal_reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE {}
        SET reversed_at = NOW(), reversal_journal_entry_id = $3, reversal_reason = $4
        WHERE tenant_id = $1 AND id = $2 AND reversed_at IS NULL
        "#,
        kind.table()
    );

    sqlx::query(&sql)
        .bind(tenant_id)
        .bind(payment_id)
        .bind(reversal_journal_entry_id)
        .bind(reversal_reason)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn list_for_parent(
    pool: &PgPool,
    tenant_id: &str,
    kind: PaymentDocKind,
    parent_id: Uuid,
) -> Result<Vec<PaymentRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM {} WHERE tenant_id = $1 AND {} = $2 ORDER BY created_at",
        select_columns(kind),
        kind.table(),
        kind.parent_column()
    );

    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(tenant_id)
        .bind(parent_id)
        .fetch_all(pool)
        .await
}

/// All payments of one kind for the tenant, newest first
pub async fn list_all(
    pool: &PgPool,
    tenant_id: &str,
    kind: PaymentDocKind,
) -> Result<Vec<PaymentRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM {} WHERE tenant_id = $1 ORDER BY created_at DESC",
        select_columns(kind),
        kind.table()
    );

    sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(tenant_id)
        .fetch_all(pool)
        .await
}
