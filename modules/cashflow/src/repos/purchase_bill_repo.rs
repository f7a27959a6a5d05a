//! Purchase bill persistence and status machine
//!
//! Lifecycle: DRAFT → POSTED → {PARTIAL, PAID}. Posting applies
//! PURCHASE_RECEIPT moves for tracked goods, which is what feeds the
//! weighted-average cost.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum PurchaseBillStatus {
    #[sqlx(rename = "DRAFT")]
    #[serde(rename = "DRAFT")]
    Draft,
    #[sqlx(rename = "POSTED")]
    #[serde(rename = "POSTED")]
    Posted,
    #[sqlx(rename = "PARTIAL")]
    #[serde(rename = "PARTIAL")]
    Partial,
    #[sqlx(rename = "PAID")]
    #[serde(rename = "PAID")]
    Paid,
}

impl PurchaseBillStatus {
    pub fn can_edit(self) -> bool {
        matches!(self, PurchaseBillStatus::Draft)
    }

    pub fn can_post(self) -> bool {
        matches!(self, PurchaseBillStatus::Draft)
    }

    pub fn admits_payment(self) -> bool {
        matches!(self, PurchaseBillStatus::Posted | PurchaseBillStatus::Partial)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PurchaseBill {
    pub id: Uuid,
    pub tenant_id: String,
    pub vendor_id: Uuid,
    pub number: String,
    pub status: PurchaseBillStatus,
    pub bill_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub location_id: Option<Uuid>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub journal_entry_id: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PurchaseBillLine {
    pub id: Uuid,
    pub tenant_id: String,
    pub purchase_bill_id: Uuid,
    pub line_no: i32,
    pub item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub expense_account_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PurchaseBillLineInsert {
    pub item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub expense_account_id: Option<Uuid>,
}

const BILL_COLUMNS: &str = "id, tenant_id, vendor_id, number, status, bill_date, due_date, \
     currency, location_id, subtotal, discount_amount, tax_amount, total, amount_paid, \
     journal_entry_id, created_by, created_at, updated_at";

const LINE_COLUMNS: &str = "id, tenant_id, purchase_bill_id, line_no, item_id, description, \
     quantity, unit_cost, discount_amount, tax_rate, tax_amount, expense_account_id";

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    vendor_id: Uuid,
    number: &str,
    bill_date: NaiveDate,
    due_date: Option<NaiveDate>,
    currency: Option<&str>,
    location_id: Option<Uuid>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    created_by: &str,
    lines: &[PurchaseBillLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO purchase_bills
            (id, tenant_id, vendor_id, number, bill_date, due_date, currency, location_id,
             subtotal, discount_amount, tax_amount, total, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(vendor_id)
    .bind(number)
    .bind(bill_date)
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
    purchase_bill_id: Uuid,
    lines: &[PurchaseBillLineInsert],
) -> Result<(), sqlx::Error> {
    for (idx, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO purchase_bill_lines
                (id, tenant_id, purchase_bill_id, line_no, item_id, description,
                 quantity, unit_cost, discount_amount, tax_rate, tax_amount, expense_account_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(purchase_bill_id)
        .bind((idx + 1) as i32)
        .bind(line.item_id)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_cost)
        .bind(line.discount_amount)
        .bind(line.tax_rate)
        .bind(line.tax_amount)
        .bind(line.expense_account_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

pub async fn replace_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    purchase_bill_id: Uuid,
    lines: &[PurchaseBillLineInsert],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM purchase_bill_lines WHERE tenant_id = $1 AND purchase_bill_id = $2")
        .bind(tenant_id)
        .bind(purchase_bill_id)
        .execute(&mut **tx)
        .await?;

    insert_lines_tx(tx, tenant_id, purchase_bill_id, lines).await
}

pub async fn fetch(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<PurchaseBill>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseBill>(&format!(
        "SELECT {BILL_COLUMNS} FROM purchase_bills WHERE tenant_id = $1 AND id = $2"
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
) -> Result<Option<PurchaseBill>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseBill>(&format!(
        "SELECT {BILL_COLUMNS} FROM purchase_bills WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn fetch_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    purchase_bill_id: Uuid,
) -> Result<Vec<PurchaseBillLine>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseBillLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM purchase_bill_lines \
         WHERE tenant_id = $1 AND purchase_bill_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(purchase_bill_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn fetch_lines(
    pool: &PgPool,
    tenant_id: &str,
    purchase_bill_id: Uuid,
) -> Result<Vec<PurchaseBillLine>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseBillLine>(&format!(
        "SELECT {LINE_COLUMNS} FROM purchase_bill_lines \
         WHERE tenant_id = $1 AND purchase_bill_id = $2 ORDER BY line_no"
    ))
    .bind(tenant_id)
    .bind(purchase_bill_id)
    .fetch_all(pool)
    .await
}

pub async fn update_draft_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    vendor_id: Uuid,
    bill_date: NaiveDate,
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
        UPDATE purchase_bills
        SET vendor_id = $3, bill_date = $4, due_date = $5, currency = $6, location_id = $7,
            subtotal = $8, discount_amount = $9, tax_amount = $10, total = $11, updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(vendor_id)
    .bind(bill_date)
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
        UPDATE purchase_bills
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

pub async fn update_paid_state_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    amount_paid: Decimal,
    status: PurchaseBillStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE purchase_bills
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

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<PurchaseBill>, sqlx::Error> {
    sqlx::query_as::<_, PurchaseBill>(&format!(
        "SELECT {BILL_COLUMNS} FROM purchase_bills WHERE tenant_id = $1 ORDER BY created_at DESC"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_only_from_draft() {
        assert!(PurchaseBillStatus::Draft.can_post());
        assert!(!PurchaseBillStatus::Posted.can_post());
        assert!(!PurchaseBillStatus::Partial.can_post());
        assert!(!PurchaseBillStatus::Paid.can_post());
    }

    #[test]
    fn test_payments_only_after_posting() {
        assert!(PurchaseBillStatus::Posted.admits_payment());
        assert!(PurchaseBillStatus::Partial.admits_payment());
        assert!(!PurchaseBillStatus::Draft.admits_payment());
        assert!(!PurchaseBillStatus::Paid.admits_payment());
    }
}
