//! Credit note persistence and status machine
//!
//! Lifecycle: DRAFT → APPROVED → POSTED → VOID. Refunds and application
//! against the source invoice are only allowed while POSTED.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum CreditNoteStatus {
    #[sqlx(rename = "DRAFT")]
    #[serde(rename = "DRAFT")]
    Draft,
    #[sqlx(rename = "APPROVED")]
    #[serde(rename = "APPROVED")]
    Approved,
    #[sqlx(rename = "POSTED")]
    #[serde(rename = "POSTED")]
    Posted,
    #[sqlx(rename = "VOID")]
    #[serde(rename = "VOID")]
    Void,
}

impl CreditNoteStatus {
    pub fn can_edit(self) -> bool {
        matches!(self, CreditNoteStatus::Draft)
    }

    pub fn can_approve(self) -> bool {
        matches!(self, CreditNoteStatus::Draft)
    }

    pub fn can_post(self) -> bool {
        matches!(self, CreditNoteStatus::Draft | CreditNoteStatus::Approved)
    }

    pub fn can_refund(self) -> bool {
        matches!(self, CreditNoteStatus::Posted)
    }

    pub fn can_void(self) -> bool {
        matches!(self, CreditNoteStatus::Posted)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditNote {
    pub id: Uuid,
    pub tenant_id: String,
    pub customer_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub number: String,
    pub status: CreditNoteStatus,
    pub note_date: NaiveDate,
    pub currency: Option<String>,
    pub location_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub amount_refunded: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub last_adjustment_journal_entry_id: Option<Uuid>,
    pub void_journal_entry_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditNoteLine {
    pub id: Uuid,
    pub tenant_id: String,
    pub credit_note_id: Uuid,
    pub line_no: i32,
    pub item_id: Uuid,
    pub invoice_line_id: Option<Uuid>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub income_account_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CreditNoteLineInsert {
    pub item_id: Uuid,
    pub invoice_line_id: Option<Uuid>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub income_account_id: Option<Uuid>,
}

const NOTE_COLUMNS: &str = "id, tenant_id, customer_id, invoice_id, number, status, note_date, \
     currency, location_id, subtotal, discount_amount, tax_amount, total, amount_refunded, \
     journal_entry_id, last_adjustment_journal_entry_id, void_journal_entry_id, created_by, \
     created_at, updated_at";

const LINE_COLUMNS: &str = "id, tenant_id, credit_note_id, line_no, item_id, invoice_line_id, \
     description, quantity, unit_price, discount_amount, tax_rate, tax_amount, income_account_id";

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    customer_id: Uuid,
    invoice_id: Option<Uuid>,
    number: &str,
    note_date: NaiveDate,
    currency: Option<&str>,
    location_id: Option<Uuid>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    created_by: &str,
    lines: &[CreditNoteLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO credit_notes
            (id, tenant_id, customer_id, invoice_id, number, note_date, currency, location_id,
             subtotal, discount_amount, tax_amount, total, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(customer_id)
    .bind(invoice_id)
    .bind(number)
    .bind(note_date)
    .bind(currency)
    .bind(location_id)
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
    credit_note_id: Uuid,
    lines: &[CreditNoteLineInsert],
) -> Result<(), sqlx::Error> {
    for (idx, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO credit_note_lines
                (id, tenant_id, credit_note_id, line_no, item_id, invoice_line_id, description,
                 quantity, unit_price, discount_amount, tax_rate, tax_amount, income_account_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(credit_note_id)
        .bind((idx + 1) as i32)
        .bind(line.item_id)
        .bind(line.invoice_line_id)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.discount_amount)
        .bind(line.tax_rate)
        .bind(line.tax_amount)
        .bind(line.income_account_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

pub async fn replace_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    credit_note_id: Uuid,
    lines: &[CreditNoteLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM credit_note_lines WHERE tenant_id = $1 AND credit_note_id = $2")
        .bind(tenant_id)
        .bind(credit_note_id)
        .execute(&mut **tx)
        .await?;

    insert_lines_tx(tx, tenant_id, credit_note_id, lines).await
}

pub async fn fetch(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<CreditNote>, sqlx::Error> {
    sqlx::query_as::<_, CreditNote>(&format!(
        "SELECT {NOTE_COLUMNS} FROM credit_notes WHERE tenant_id = $1 AND id = $2"
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
) -> Result<Option<CreditNote>, sqlx::Error> {
    sqlx::query_as::<_, CreditNote>(&format!(
        "SELECT {NOTE_COLUMNS} FROM credit_notes WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn fetch_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    credit_note_id: Uuid,
) -> Result<Vec<CreditNoteLine>, sqlx::Error> {
    sqlx::query_as::<_, CreditNoteLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM credit_note_lines \
         WHERE tenant_id = $1 AND credit_note_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(credit_note_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn fetch_lines(
    pool: &PgPool,
    tenant_id: &str,
    credit_note_id: Uuid,
) -> Result<Vec<CreditNoteLine>, sqlx::Error> {
    sqlx::query_as::<_, CreditNoteLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM credit_note_lines \
         WHERE tenant_id = $1 AND credit_note_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(credit_note_id)
    .fetch_all(pool)
    .await
}

pub async fn update_draft_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    customer_id: Uuid,
    invoice_id: Option<Uuid>,
    note_date: NaiveDate,
    currency: Option<&str>,
    location_id: Option<Uuid>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE credit_notes
        SET customer_id = $3, invoice_id = $4, note_date = $5, currency = $6, location_id = $7,
            subtotal = $8, discount_amount = $9, tax_amount = $10, total = $11, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(customer_id)
    .bind(invoice_id)
    .bind(note_date)
    .bind(currency)
    .bind(location_id)
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
    sqlx::query("DELETE FROM credit_notes WHERE tenant_id = $1 AND id = $2")
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
    status: CreditNoteStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE credit_notes SET status = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id)
    .bind(id)
    .bind(status)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn mark_posted_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    journal_entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE credit_notes
        SET status = 'POSTED', subtotal = $3, discount_amount = $4, tax_amount = $5, total = $6,
            amount_refunded = 0, journal_entry_id = $7, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(subtotal)
    .bind(discount_amount)
    .bind(tax_amount)
    .bind(total)
    .bind(journal_entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Record a posted-edit: new totals and the active adjustment entry
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
        UPDATE credit_notes
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
        UPDATE credit_notes
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

/// Increase the refunded amount after a refund posts
pub async fn add_refunded_amount_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    amount: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE credit_notes
        SET amount_refunded = amount_refunded + $3, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, FromRow)]
pub struct CreditNoteRefund {
    pub id: Uuid,
    pub tenant_id: String,
    pub credit_note_id: Uuid,
    pub amount: Decimal,
    pub refund_date: NaiveDate,
    pub bank_account_id: Uuid,
    pub journal_entry_id: Uuid,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_refund_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    credit_note_id: Uuid,
    amount: Decimal,
    refund_date: NaiveDate,
    bank_account_id: Uuid,
    journal_entry_id: Uuid,
    created_by: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO credit_note_refunds
            (id, tenant_id, credit_note_id, amount, refund_date, bank_account_id,
             journal_entry_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(credit_note_id)
    .bind(amount)
    .bind(refund_date)
    .bind(bank_account_id)
    .bind(journal_entry_id)
    .bind(created_by)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

pub async fn list_refunds(
    pool: &PgPool,
    tenant_id: &str,
    credit_note_id: Uuid,
) -> Result<Vec<CreditNoteRefund>, sqlx::Error> {
    sqlx::query_as::<_, CreditNoteRefund>(
        "SELECT id, tenant_id, credit_note_id, amount, refund_date, bank_account_id, \
         journal_entry_id, created_by, created_at \
         FROM credit_note_refunds WHERE tenant_id = $1 AND credit_note_id = $2 ORDER BY created_at",
    )
    .bind(tenant_id)
    .bind(credit_note_id)
    .fetch_all(pool)
    .await
}

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<CreditNote>, sqlx::Error> {
    sqlx::query_as::<_, CreditNote>(&format!(
        "SELECT {NOTE_COLUMNS} FROM credit_notes WHERE tenant_id = $1 ORDER BY created_at DESC"
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
        assert!(CreditNoteStatus::Draft.can_post());
        assert!(CreditNoteStatus::Approved.can_post());
        assert!(!CreditNoteStatus::Posted.can_post());
        assert!(!CreditNoteStatus::Void.can_post());
    }

    #[test]
    fn test_refund_only_while_posted() {
        assert!(CreditNoteStatus::Posted.can_refund());
        assert!(!CreditNoteStatus::Draft.can_refund());
        assert!(!CreditNoteStatus::Approved.can_refund());
        assert!(!CreditNoteStatus::Void.can_refund());
    }
}
