use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Item kind: services never touch inventory; goods may be tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
pub enum ItemType {
    #[sqlx(rename = "SERVICE")]
    #[serde(rename = "SERVICE")]
    Service,
    #[sqlx(rename = "GOODS")]
    #[serde(rename = "GOODS")]
    Goods,
}

#[derive(Debug, Clone, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub sku: Option<String>,
    pub item_type: ItemType,
    pub track_inventory: bool,
    pub unit_price: Decimal,
    pub unit_cost: Decimal,
    pub income_account_id: Option<Uuid>,
    pub expense_account_id: Option<Uuid>,
    pub default_location_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// True when sales/purchases of this item move stock
    pub fn is_tracked(&self) -> bool {
        self.item_type == ItemType::Goods && self.track_inventory
    }
}

const SELECT_COLUMNS: &str = "id, tenant_id, name, sku, item_type, track_inventory, unit_price, \
     unit_cost, income_account_id, expense_account_id, default_location_id, is_active, \
     created_at, updated_at";

pub async fn find_by_id(
    pool: &PgPool,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Item>, sqlx::Error> {
    sqlx::query_as::<_, Item>(&format!(
        "SELECT {SELECT_COLUMNS} FROM items WHERE tenant_id = $1 AND id = $2"
    ))
    .bind(tenant_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
) -> Result<Option<Item>, sqlx::Error> {
    sqlx::query_as::<_, Item>(&format!(
        "SELECT {SELECT_COLUMNS} FROM items WHERE tenant_id = $1 AND id = $2"
    ))
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
    sku: Option<&str>,
    item_type: ItemType,
    track_inventory: bool,
    unit_price: Decimal,
    unit_cost: Decimal,
    income_account_id: Option<Uuid>,
    expense_account_id: Option<Uuid>,
    default_location_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO items
            (id, tenant_id, name, sku, item_type, track_inventory, unit_price, unit_cost,
             income_account_id, expense_account_id, default_location_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(name)
    .bind(sku)
    .bind(item_type)
    .bind(track_inventory)
    .bind(unit_price)
    .bind(unit_cost)
    .bind(income_account_id)
    .bind(expense_account_id)
    .bind(default_location_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn update_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    id: Uuid,
    name: &str,
    sku: Option<&str>,
    unit_price: Decimal,
    unit_cost: Decimal,
    income_account_id: Option<Uuid>,
    expense_account_id: Option<Uuid>,
    default_location_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE items
        SET name = $3, sku = $4, unit_price = $5, unit_cost = $6,
            income_account_id = $7, expense_account_id = $8, default_location_id = $9,
            updated_at = NOW()
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(id)
    .bind(name)
    .bind(sku)
    .bind(unit_price)
    .bind(unit_cost)
    .bind(income_account_id)
    .bind(expense_account_id)
    .bind(default_location_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn list(pool: &PgPool, tenant_id: &str) -> Result<Vec<Item>, sqlx::Error> {
    sqlx::query_as::<_, Item>(&format!(
        "SELECT {SELECT_COLUMNS} FROM items WHERE tenant_id = $1 ORDER BY name"
    ))
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}
