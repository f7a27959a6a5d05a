//! Invoice persistence and status machine
//!
//! Lifecycle: DRAFT → APPROVED → POSTED → {PARTIAL, PAID, VOID}. Backward
//! transitions are forbidden; VOID is terminal. Every state transition in
//! the services begins with `lock_for_update_tx`, which is the
//! authoritative serializer for concurrent commands on one invoice.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum InvoiceStatus {
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

impl InvoiceStatus {
    /// Draft invoices may be edited or deleted
    pub fn can_edit(self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    pub fn can_approve(self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    pub fn can_post(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Approved)
    }

    /// Posted and partially paid invoices accept further payments
    pub fn admits_payment(self) -> bool {
        matches!(self, InvoiceStatus::Posted | InvoiceStatus::Partial)
    }

    /// Credit notes may only target invoices that have been posted
    pub fn admits_credit_note(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Posted | InvoiceStatus::Partial | InvoiceStatus::Paid
        )
    }

    /// Void requires no surviving payments, so only POSTED qualifies
    pub fn can_void(self) -> bool {
        matches!(self, InvoiceStatus::Posted)
    }

    pub fn can_adjust(self) -> bool {
        matches!(self, InvoiceStatus::Posted)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub tenant_id: String,
    pub customer_id: Uuid,
    pub number: String,
    pub status: InvoiceStatus,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub location_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub last_adjustment_journal_entry_id: Option<Uuid>,
    pub void_journal_entry_id: Option<Uuid>,
    pub pending_payment_proofs: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceLine {
    pub id: Uuid,
    pub tenant_id: String,
    pub invoice_id: Uuid,
    pub line_no: i32,
    pub item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub income_account_id: Option<Uuid>,
}

/// Line content for insert/replace, ids assigned by the repo
#[derive(Debug, Clone)]
pub struct InvoiceLineInsert {
    pub item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub income_account_id: Option<Uuid>,
}

const INVOICE_COLUMNS: &str = "id, tenant_id, customer_id, number, status, invoice_date, due_date, \
     currency, location_id, subtotal, discount_amount, tax_amount, total, amount_paid, \
     journal_entry_id, last_adjustment_journal_entry_id, void_journal_entry_id, \
     pending_payment_proofs, created_by, created_at, updated_at";

const LINE_COLUMNS: &str = "id, tenant_id, invoice_id, line_no, item_id, description, quantity, \
     unit_price, discount_amount, tax_rate, tax_amount, income_account_id";

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    customer_id: Uuid,
    number: &str,
    invoice_date: NaiveDate,
    due_date: Option<NaiveDate>,
    currency: Option<&str>,
    location_id: Option<Uuid>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    created_by: &str,
    lines: &[InvoiceLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO invoices
            (id, tenant_id, customer_id, number, invoice_date, due_date, currency, location_id,
             subtotal, discount_amount, tax_amount, total, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(customer_id)
    .bind(number)
    .bind(invoice_date)
    .bind(due_date)
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
    invoice_id: Uuid,
    lines: &[InvoiceLineInsert],
) -> Result<(), sqlx::Error> {
    for (idx, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO invoice_lines
                (id, tenant_id, invoice_id, line_no, item_id, description, quantity,
                 unit_price, discount_amount, tax_rate, tax_amount, income_account_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(invoice_id)
        .bind((idx + 1) as i32)
        .bind(line.item_id)
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

/// Replace the draft's lines wholesale (draft edits only)
pub async fn replace_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    invoice_id: Uuid,
    lines: &[InvoiceLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM invoice_lines WHERE tenant_id = $1 AND invoice_id = $2")
        .bind(tenant_id)
        .bind(invoice_id)
        .execute(&mut **tx)
        .await?;

    insert_lines_tx(tx, tenant_id, invoice_id, lines).await
}

pub async fn fetch(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Row-lock the invoice and reload it; the authoritative serializer for
/// every invoice state transition
pub async fn lock_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn fetch_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    invoice_id: Uuid,
) -> Result<Vec<InvoiceLine>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM invoice_lines WHERE tenant_id = $1 AND invoice_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn fetch_lines(
    pool: &PgPool,
    tenant_id: &str,
    invoice_id: Uuid,
) -> Result<Vec<InvoiceLine>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM invoice_lines WHERE tenant_id = $1 AND invoice_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_all(pool)
    .await
}

/// Update a draft's header fields
pub async fn update_draft_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    customer_id: Uuid,
    invoice_date: NaiveDate,
    due_date: Option<NaiveDate>,
    currency: Option<&str>,
    location_id: Option<Uuid>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE invoices
        SET customer_id = $3, invoice_date = $4, due_date = $5, currency = $6, location_id = $7,
            subtotal = $8, discount_amount = $9, tax_amount = $10, total = $11, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(customer_id)
    .bind(invoice_date)
    .bind(due_date)
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
    sqlx::query("DELETE FROM invoices WHERE tenant_id = $1 AND id = $2")
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
    status: InvoiceStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE invoices SET status = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id)
    .bind(id)
    .bind(status)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Transition to POSTED: snapshot totals, link the posting entry, reset paid
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
        UPDATE invoices
        SET status = 'POSTED', subtotal = $3, discount_amount = $4, tax_amount = $5, total = $6,
            amount_paid = 0, journal_entry_id = $7, updated_at = NOW()
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
        UPDATE invoices
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

/// Transition to VOID, linking the reversal entry and clearing any
/// superseded adjustment link
pub async fn mark_voided_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    void_journal_entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE invoices
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

/// Recompute paid state after a payment is recorded or reversed
pub async fn update_paid_state_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    amount_paid: Decimal,
    status: InvoiceStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE invoices
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

pub async fn update_pending_proofs_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    pending_payment_proofs: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE invoices SET pending_payment_proofs = $3, updated_at = NOW() \
         WHERE tenant_id = $1 AND id = $2",
    )
    .bind(tenant_id)
    .bind(id)
    .bind(pending_payment_proofs)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// True when any POSTED credit note is linked to the invoice
pub async fn has_posted_credit_notes_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    invoice_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM credit_notes \
         WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'POSTED')",
    )
    .bind(tenant_id)
    .bind(invoice_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 ORDER BY created_at DESC"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_drafts_are_editable() {
        assert!(InvoiceStatus::Draft.can_edit());
        assert!(!InvoiceStatus::Approved.can_edit());
        assert!(!InvoiceStatus::Posted.can_edit());
        assert!(!InvoiceStatus::Void.can_edit());
    }

    #[test]
    fn test_post_allowed_from_draft_and_approved() {
        assert!(InvoiceStatus::Draft.can_post());
        assert!(InvoiceStatus::Approved.can_post());
        assert!(!InvoiceStatus::Posted.can_post());
        assert!(!InvoiceStatus::Partial.can_post());
        assert!(!InvoiceStatus::Paid.can_post());
        assert!(!InvoiceStatus::Void.can_post());
    }

    #[test]
    fn test_payments_only_on_posted_or_partial() {
        assert!(InvoiceStatus::Posted.admits_payment());
        assert!(InvoiceStatus::Partial.admits_payment());
        assert!(!InvoiceStatus::Paid.admits_payment());
        assert!(!InvoiceStatus::Draft.admits_payment());
        assert!(!InvoiceStatus::Void.admits_payment());
    }

    #[test]
    fn test_void_is_terminal() {
        assert!(!InvoiceStatus::Void.can_post());
        assert!(!InvoiceStatus::Void.can_void());
        assert!(!InvoiceStatus::Void.admits_payment());
        assert!(!InvoiceStatus::Void.admits_credit_note());
        assert!(!InvoiceStatus::Void.can_adjust());
    }
}
