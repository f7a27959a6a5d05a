//! Tenant (company) configuration row
//!
//! The company row carries the distinguished-account wiring every posting
//! flow depends on (AR, AP, opening balance equity, inventory asset, COGS)
//! plus base currency, timezone, and the default stock location.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub base_currency: Option<String>,
    pub time_zone: String,
    pub ar_account_id: Option<Uuid>,
    pub ap_account_id: Option<Uuid>,
    pub opening_balance_equity_account_id: Option<Uuid>,
    pub inventory_asset_account_id: Option<Uuid>,
    pub cogs_account_id: Option<Uuid>,
    pub default_location_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "id, name, base_currency, time_zone, ar_account_id, ap_account_id, \
     opening_balance_equity_account_id, inventory_asset_account_id, cogs_account_id, \
     default_location_id, created_at, updated_at";

pub async fn fetch(pool: &PgPool, tenant_id: &str) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>(&format!("SELECT {SELECT_COLUMNS} FROM companies WHERE id = $1"))
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
) -> Result<Option<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>(&format!("SELECT {SELECT_COLUMNS} FROM companies WHERE id = $1"))
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await
}

/// Insert a company row (tenant provisioning)
pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    name: &str,
    base_currency: Option<&str>,
    time_zone: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO companies (id, name, base_currency, time_zone)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(tenant_id)
    .bind(name)
    .bind(base_currency)
    .bind(time_zone)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Update the distinguished-account and default-location wiring
pub async fn update_settings_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    base_currency: Option<&str>,
    time_zone: &str,
    ar_account_id: Option<Uuid>,
    ap_account_id: Option<Uuid>,
    opening_balance_equity_account_id: Option<Uuid>,
    inventory_asset_account_id: Option<Uuid>,
    cogs_account_id: Option<Uuid>,
    default_location_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE companies
        SET base_currency = $2,
            time_zone = $3,
            ar_account_id = $4,
            ap_account_id = $5,
            opening_balance_equity_account_id = $6,
            inventory_asset_account_id = $7,
            cogs_account_id = $8,
            default_location_id = $9,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(tenant_id)
    .bind(base_currency)
    .bind(time_zone)
    .bind(ar_account_id)
    .bind(ap_account_id)
    .bind(opening_balance_equity_account_id)
    .bind(inventory_asset_account_id)
    .bind(cogs_account_id)
    .bind(default_location_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
