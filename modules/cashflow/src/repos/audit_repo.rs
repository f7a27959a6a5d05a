//! Append-only audit trail, written inside the same transaction as the
//! business change it records.

use sqlx::{Postgres, Transaction};

use crate::context::WriteContext;

pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &WriteContext,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    metadata: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs
            (tenant_id, user_id, action, entity_type, entity_id,
             idempotency_key, correlation_id, metadata, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&ctx.tenant_id)
    .bind(&ctx.user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(&ctx.idempotency_key)
    .bind(ctx.correlation_id)
    .bind(metadata)
    .bind(ctx.now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
