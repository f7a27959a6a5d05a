//! Expense (vendor bill) persistence and status machine
//!
//! Lifecycle: DRAFT → APPROVED → POSTED → {PARTIAL, PAID, VOID}. The
//! paid-immediately post variant bypasses AP and lands directly on PAID
//! with a synthesized payment row.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum ExpenseStatus {
    #[sqlx(rename = "DRAFT")]
    #[serde(rename = "DRAFT")]
    Draft,
    #[sqlx(rename = "APPROVED")]
    #[serde(rename = "APPROVED")]
    Approved,
    #[sqlx(rename = "POSTED")]
    #[serde(rename = "POSTED")]
    Posted,
    #[sqlx(rename = "PARTIAL")]
    #[serde(rename = "PARTIAL")]
    Partial,
    #[sqlx(rename = "PAID")]
    #[serde(rename = "PAID")]
    Paid,
    #[sqlx(rename = "VOID")]
    #[serde(rename = "VOID")]
    Void,
}

impl ExpenseStatus {
    pub fn can_edit(self) -> bool {
        matches!(self, ExpenseStatus::Draft)
    }

    pub fn can_approve(self) -> bool {
        matches!(self, ExpenseStatus::Draft)
    }

    pub fn can_post(self) -> bool {
        matches!(self, ExpenseStatus::Draft | ExpenseStatus::Approved)
    }

    pub fn admits_payment(self) -> bool {
        matches!(self, ExpenseStatus::Posted | ExpenseStatus::Partial)
    }

    pub fn can_void(self) -> bool {
        matches!(self, ExpenseStatus::Posted)
    }

    pub fn can_adjust(self) -> bool {
        matches!(self, ExpenseStatus::Posted)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Expense {
    pub id: Uuid,
    pub tenant_id: String,
    pub vendor_id: Option<Uuid>,
    pub number: String,
    pub status: ExpenseStatus,
    pub expense_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub last_adjustment_journal_entry_id: Option<Uuid>,
    pub void_journal_entry_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExpenseLine {
    pub id: Uuid,
    pub tenant_id: String,
    pub expense_id: Uuid,
    pub line_no: i32,
    pub expense_account_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExpenseLineInsert {
    pub expense_account_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
}

const EXPENSE_COLUMNS: &str = "id, tenant_id, vendor_id, number, status, expense_date, due_date, \
     currency, subtotal, discount_amount, tax_amount, total, amount_paid, journal_entry_id, \
     last_adjustment_journal_entry_id, void_journal_entry_id, created_by, created_at, updated_at";

const LINE_COLUMNS: &str = "id, tenant_id, expense_id, line_no, expense_account_id, description, \
     quantity, unit_cost, discount_amount, tax_rate, tax_amount";

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    vendor_id: Option<Uuid>,
    number: &str,
    expense_date: NaiveDate,
    due_date: Option<NaiveDate>,
    currency: Option<&str>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    created_by: &str,
    lines: &[ExpenseLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO expenses
            (id, tenant_id, vendor_id, number, expense_date, due_date, currency,
             subtotal, discount_amount, tax_amount, total, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(vendor_id)
    .bind(number)
    .bind(expense_date)
    .bind(due_date)
    .bind(currency)
    .bind(subtotal)
    .bind(discount_amount)
    .bind(tax_amount)
    .bind(total)
    .bind(created_by)
    .execute(&mut **tx)
    .await?;

    insert_lines_tx(tx, tenant_id, id, lines).await
}

async fn insert_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    expense_id: Uuid,
    lines: &[ExpenseLineInsert],
) -> Result<(), sqlx::Error> {
    for (idx, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO expense_lines
                (id, tenant_id, expense_id, line_no, expense_account_id, description,
                 quantity, unit_cost, discount_amount, tax_rate, tax_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(expense_id)
        .bind((idx + 1) as i32)
        .bind(line.expense_account_id)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_cost)
        .bind(line.discount_amount)
        .bind(line.tax_rate)
        .bind(line.tax_amount)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

pub async fn replace_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    expense_id: Uuid,
    lines: &[ExpenseLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM expense_lines WHERE tenant_id = $1 AND expense_id = $2")
        .bind(tenant_id)
        .bind(expense_id)
        .execute(&mut **tx)
        .await?;

    insert_lines_tx(tx, tenant_id, expense_id, lines).await
}

pub async fn fetch(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(&format!(
        "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn lock_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(&format!(
        "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn fetch_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    expense_id: Uuid,
) -> Result<Vec<ExpenseLine>, sqlx::Error> {
    sqlx::query_as::<_, ExpenseLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM expense_lines WHERE tenant_id = $1 AND expense_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(expense_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn fetch_lines(
    pool: &PgPool,
    tenant_id: &str,
    expense_id: Uuid,
) -> Result<Vec<ExpenseLine>, sqlx::Error> {
    sqlx::query_as::<_, ExpenseLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM expense_lines WHERE tenant_id = $1 AND expense_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(expense_id)
    .fetch_all(pool)
    .await
}

pub async fn update_draft_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    vendor_id: Option<Uuid>,
    expense_date: NaiveDate,
    due_date: Option<NaiveDate>,
    currency: Option<&str>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE expenses
        SET vendor_id = $3, expense_date = $4, due_date = $5, currency = $6,
            subtotal = $7, discount_amount = $8, tax_amount = $9, total = $10, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(vendor_id)
    .bind(expense_date)
    .bind(due_date)
    .bind(currency)
    .bind(subtotal)
    .bind(discount_amount)
    .bind(tax_amount)
    .bind(total)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn delete_draft_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM expenses WHERE tenant_id = $1 AND id = $2")
        .bind(tenant_id)
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub async fn set_status_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    status: ExpenseStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE expenses SET status = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id)
    .bind(id)
    .bind(status)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Transition to POSTED (or directly to PAID for the paid-immediately variant)
pub async fn mark_posted_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    status: ExpenseStatus,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    amount_paid: Decimal,
    journal_entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE expenses
        SET status = $3, subtotal = $4, discount_amount = $5, tax_amount = $6, total = $7,
            amount_paid = $8, journal_entry_id = $9, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(status)
    .bind(subtotal)
    .bind(discount_amount)
    .bind(tax_amount)
    .bind(total)
    .bind(amount_paid)
    .bind(journal_entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn mark_adjusted_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    last_adjustment_journal_entry_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE expenses
        SET subtotal = $3, discount_amount = $4, tax_amount = $5, total = $6,
            last_adjustment_journal_entry_id = $7, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(subtotal)
    .bind(discount_amount)
    .bind(tax_amount)
    .bind(total)
    .bind(last_adjustment_journal_entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn mark_voided_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    void_journal_entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE expenses
        SET status = 'VOID', void_journal_entry_id = $3,
            last_adjustment_journal_entry_id = NULL, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(void_journal_entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn update_paid_state_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    amount_paid: Decimal,
    status: ExpenseStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE expenses
        SET amount_paid = $3, status = $4, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(amount_paid)
    .bind(status)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<Expense>, sqlx::Error> {
    sqlx::query_as::<_, Expense>(&format!(
        "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE tenant_id = $1 ORDER BY created_at DESC"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_allowed_from_draft_and_approved() {
        assert!(ExpenseStatus::Draft.can_post());
        assert!(ExpenseStatus::Approved.can_post());
        assert!(!ExpenseStatus::Posted.can_post());
        assert!(!ExpenseStatus::Paid.can_post());
    }

    #[test]
    fn test_void_requires_posted() {
        assert!(ExpenseStatus::Posted.can_void());
        assert!(!ExpenseStatus::Partial.can_void());
        assert!(!ExpenseStatus::Paid.can_void());
        assert!(!ExpenseStatus::Void.can_void());
    }
}
