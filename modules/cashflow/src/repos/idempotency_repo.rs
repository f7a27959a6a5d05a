//! Idempotency record persistence
//!
//! One row per (tenant, key). The initial insert races via
//! `ON CONFLICT DO NOTHING`; exactly one caller wins and runs the command,
//! everyone else reads the row and follows the replay protocol in
//! `crate::idempotency`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

pub const STATUS_IN_FLIGHT: &str = "IN_FLIGHT";
pub const STATUS_DONE: &str = "DONE";
pub const STATUS_FAILED: &str = "FAILED";

#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub tenant_id: String,
    pub idempotency_key: String,
    pub status: String,
    pub request_hash: String,
    pub response_body: Option<serde_json::Value>,
    pub status_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Try to claim the key; true when this caller inserted the IN_FLIGHT row
pub async fn try_insert_in_flight(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
    request_hash: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO idempotency_records (tenant_id, idempotency_key, status, request_hash)
        VALUES ($1, $2, 'IN_FLIGHT', $3)
        ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
        "#,
    )
    .bind(tenant_id)
    .bind(key)
    .bind(request_hash)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn fetch(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    sqlx::query_as::<_, IdempotencyRecord>(
        r#"
        SELECT tenant_id, idempotency_key, status, request_hash,
               response_body, status_code, created_at, completed_at
        FROM idempotency_records
        WHERE tenant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(tenant_id)
    .bind(key)
    .fetch_optional(pool)
    .await
}

/// Record the successful response for replay
pub async fn mark_done(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
    status_code: i32,
    response_body: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET status = 'DONE', status_code = $3, response_body = $4, completed_at = NOW()
        WHERE tenant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(tenant_id)
    .bind(key)
    .bind(status_code)
    .bind(response_body)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a terminal domain failure for replay
pub async fn mark_failed(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
    status_code: i32,
    error_body: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE idempotency_records
        SET status = 'FAILED', status_code = $3, response_body = $4, completed_at = NOW()
        WHERE tenant_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(tenant_id)
    .bind(key)
    .bind(status_code)
    .bind(error_body)
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop the IN_FLIGHT claim after an infrastructure failure so the client
/// can retry with the same key
pub async fn delete_in_flight(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        DELETE FROM idempotency_records
        WHERE tenant_id = $1 AND idempotency_key = $2 AND status = 'IN_FLIGHT'
        "#,
    )
    .bind(tenant_id)
    .bind(key)
    .execute(pool)
    .await?;

    Ok(())
}
