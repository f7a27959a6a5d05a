//! Stock balances and append-only stock moves
//!
//! `stock_balances` is the running (quantity, unit cost) per
//! (tenant, location, item); mutation happens only under the row lock taken
//! by `balance_for_update_tx`. `stock_moves` rows are never updated after
//! insert except for linking a journal entry id while it is still NULL.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum MoveType {
    #[sqlx(rename = "PURCHASE_RECEIPT")]
    #[serde(rename = "PURCHASE_RECEIPT")]
    PurchaseReceipt,
    #[sqlx(rename = "SALE_ISSUE")]
    #[serde(rename = "SALE_ISSUE")]
    SaleIssue,
    #[sqlx(rename = "SALE_RETURN")]
    #[serde(rename = "SALE_RETURN")]
    SaleReturn,
    #[sqlx(rename = "ADJUSTMENT")]
    #[serde(rename = "ADJUSTMENT")]
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum MoveDirection {
    #[sqlx(rename = "IN")]
    #[serde(rename = "IN")]
    In,
    #[sqlx(rename = "OUT")]
    #[serde(rename = "OUT")]
    Out,
}

#[derive(Debug, Clone, FromRow)]
pub struct StockMove {
    pub id: Uuid,
    pub tenant_id: String,
    pub location_id: Uuid,
    pub item_id: Uuid,
    pub move_date: NaiveDate,
    pub move_type: MoveType,
    pub direction: MoveDirection,
    pub quantity: Decimal,
    pub unit_cost_applied: Decimal,
    pub total_cost_applied: Decimal,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub correlation_id: Uuid,
    pub created_by: String,
    pub journal_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Current balance snapshot, read under FOR UPDATE
#[derive(Debug, Clone, Copy)]
pub struct BalanceSnapshot {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Lock and read the balance row; None when the item has never moved here
pub async fn balance_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    location_id: Uuid,
    item_id: Uuid,
) -> Result<Option<BalanceSnapshot>, sqlx::Error> {
    let row: Option<(Decimal, Decimal)> = sqlx::query_as(
        r#"
        SELECT quantity, unit_cost
        FROM stock_balances
        WHERE tenant_id = $1 AND location_id = $2 AND item_id = $3
        FOR UPDATE
        "#,
    )
    .bind(tenant_id)
    .bind(location_id)
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|(quantity, unit_cost)| BalanceSnapshot {
        quantity,
        unit_cost,
    }))
}

/// Write the new running balance (insert or update)
pub async fn upsert_balance_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    location_id: Uuid,
    item_id: Uuid,
    quantity: Decimal,
    unit_cost: Decimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO stock_balances (tenant_id, location_id, item_id, quantity, unit_cost)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tenant_id, location_id, item_id)
        DO UPDATE SET quantity = EXCLUDED.quantity,
                      unit_cost = EXCLUDED.unit_cost,
                      updated_at = NOW()
        "#,
    )
    .bind(tenant_id)
    .bind(location_id)
    .bind(item_id)
    .bind(quantity)
    .bind(unit_cost)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Read the balance without locking (read endpoints)
pub async fn fetch_balance(
    pool: &sqlx::PgPool,
    tenant_id: &str,
    location_id: Uuid,
    item_id: Uuid,
) -> Result<Option<BalanceSnapshot>, sqlx::Error> {
    let row: Option<(Decimal, Decimal)> = sqlx::query_as(
        r#"
        SELECT quantity, unit_cost
        FROM stock_balances
        WHERE tenant_id = $1 AND location_id = $2 AND item_id = $3
        "#,
    )
    .bind(tenant_id)
    .bind(location_id)
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(quantity, unit_cost)| BalanceSnapshot {
        quantity,
        unit_cost,
    }))
}

/// Insert parameters for a stock move row
#[derive(Debug, Clone)]
pub struct StockMoveInsert {
    pub location_id: Uuid,
    pub item_id: Uuid,
    pub move_date: NaiveDate,
    pub move_type: MoveType,
    pub direction: MoveDirection,
    pub quantity: Decimal,
    pub unit_cost_applied: Decimal,
    pub total_cost_applied: Decimal,
    pub reference_type: String,
    pub reference_id: Uuid,
    pub correlation_id: Uuid,
    pub created_by: String,
}

pub async fn insert_move_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    mv: &StockMoveInsert,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO stock_moves
            (id, tenant_id, location_id, item_id, move_date, move_type, direction,
             quantity, unit_cost_applied, total_cost_applied,
             reference_type, reference_id, correlation_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(mv.location_id)
    .bind(mv.item_id)
    .bind(mv.move_date)
    .bind(mv.move_type)
    .bind(mv.direction)
    .bind(mv.quantity)
    .bind(mv.unit_cost_applied)
    .bind(mv.total_cost_applied)
    .bind(&mv.reference_type)
    .bind(mv.reference_id)
    .bind(mv.correlation_id)
    .bind(&mv.created_by)
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

/// Link freshly created moves to their journal entry
///
/// Only rows whose `journal_entry_id` is still NULL may be linked; a second
/// link attempt is a no-op by construction.
pub async fn link_journal_entry_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    move_ids: &[Uuid],
    journal_entry_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE stock_moves
        SET journal_entry_id = $3
        WHERE tenant_id = $1 AND id = ANY($2) AND journal_entry_id IS NULL
        "#,
    )
    .bind(tenant_id)
    .bind(move_ids)
    .bind(journal_entry_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Latest move date for the balance key; used to detect backdated inserts
pub async fn max_move_date_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    location_id: Uuid,
    item_id: Uuid,
) -> Result<Option<NaiveDate>, sqlx::Error> {
    let (max_date,): (Option<NaiveDate>,) = sqlx::query_as(
        r#"
        SELECT MAX(move_date)
        FROM stock_moves
        WHERE tenant_id = $1 AND location_id = $2 AND item_id = $3
        "#,
    )
    .bind(tenant_id)
    .bind(location_id)
    .bind(item_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(max_date)
}

const MOVE_COLUMNS: &str = "id, tenant_id, location_id, item_id, move_date, move_type, direction, \
     quantity, unit_cost_applied, total_cost_applied, reference_type, reference_id, \
     correlation_id, created_by, journal_entry_id, created_at";

/// All SALE_ISSUE moves a document produced for one item, oldest first
///
/// Credit-note restock walks these in insertion order to return stock at the
/// exact costs it was issued at.
pub async fn sale_issues_for_reference_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    item_id: Uuid,
    reference_type: &str,
    reference_id: Uuid,
) -> Result<Vec<StockMove>, sqlx::Error> {
    sqlx::query_as::<_, StockMove>(&format!(
        r#"
        SELECT {MOVE_COLUMNS}
        FROM stock_moves
        WHERE tenant_id = $1 AND item_id = $2
          AND reference_type = $3 AND reference_id = $4
          AND move_type = 'SALE_ISSUE'
        ORDER BY created_at, id
        "#
    ))
    .bind(tenant_id)
    .bind(item_id)
    .bind(reference_type)
    .bind(reference_id)
    .fetch_all(&mut **tx)
    .await
}

/// All moves a document produced, oldest first (void paths reverse these)
pub async fn moves_for_reference_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    reference_type: &str,
    reference_id: Uuid,
) -> Result<Vec<StockMove>, sqlx::Error> {
    sqlx::query_as::<_, StockMove>(&format!(
        r#"
        SELECT {MOVE_COLUMNS}
        FROM stock_moves
        WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3
        ORDER BY created_at, id
        "#
    ))
    .bind(tenant_id)
    .bind(reference_type)
    .bind(reference_id)
    .fetch_all(&mut **tx)
    .await
}

/// Pool-side variant used to precompute lock keys before the transaction
pub async fn moves_for_reference(
    pool: &sqlx::PgPool,
    tenant_id: &str,
    reference_type: &str,
    reference_id: Uuid,
) -> Result<Vec<StockMove>, sqlx::Error> {
    sqlx::query_as::<_, StockMove>(&format!(
        r#"
        SELECT {MOVE_COLUMNS}
        FROM stock_moves
        WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3
        ORDER BY created_at, id
        "#
    ))
    .bind(tenant_id)
    .bind(reference_type)
    .bind(reference_id)
    .fetch_all(pool)
    .await
}

/// Quantity already returned against an invoice, grouped by location
///
/// Aggregates SALE_RETURN moves referencing POSTED credit notes linked to
/// the invoice.
pub async fn returned_quantities_for_invoice_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    invoice_id: Uuid,
    item_id: Uuid,
) -> Result<Vec<(Uuid, Decimal)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT m.location_id, COALESCE(SUM(m.quantity), 0)
        FROM stock_moves m
        JOIN credit_notes cn
          ON cn.id = m.reference_id AND cn.tenant_id = m.tenant_id
        WHERE m.tenant_id = $1
          AND m.reference_type = 'CreditNote'
          AND m.move_type = 'SALE_RETURN'
          AND m.item_id = $2
          AND cn.invoice_id = $3
          AND cn.status = 'POSTED'
        GROUP BY m.location_id
        "#,
    )
    .bind(tenant_id)
    .bind(item_id)
    .bind(invoice_id)
    .fetch_all(&mut **tx)
    .await
}
