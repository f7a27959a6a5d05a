//! Transactional outbox
//!
//! Every semantic fact a command produces is inserted as one event row in
//! the same transaction as the business change. After commit, the caller
//! attempts a best-effort fast-path publish; rows the fast path misses are
//! drained by the background publisher. Delivery is at-least-once and
//! consumers dedupe by `eventId`.

use std::sync::Arc;

use event_bus::{EventBus, EventEnvelope};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Subject prefix for all events this service publishes
pub const SUBJECT_PREFIX: &str = "cashflow.events";

/// Subject an event type is published on
pub fn subject_for(event_type: &str) -> String {
    format!("{SUBJECT_PREFIX}.{event_type}")
}

/// Insert one envelope into the outbox inside the caller's transaction
pub async fn enqueue_tx(
    tx: &mut Transaction<'_, Postgres>,
    envelope: &EventEnvelope<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_value(envelope).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO outbox_events
            (tenant_id, event_id, event_type, aggregate_type, aggregate_id, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&envelope.partition_key)
    .bind(envelope.event_id)
    .bind(&envelope.event_type)
    .bind(&envelope.aggregate_type)
    .bind(&envelope.aggregate_id)
    .bind(payload)
    .bind(envelope.occurred_at)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        event_id = %envelope.event_id,
        event_type = %envelope.event_type,
        "event enqueued to outbox"
    );

    Ok(())
}

/// Best-effort fast-path publish after commit
///
/// Failures are logged and swallowed; the background publisher will deliver
/// anything the fast path misses. Never load-bearing.
pub async fn publish_after_commit(
    pool: &PgPool,
    bus: &Arc<dyn EventBus>,
    envelopes: &[EventEnvelope<serde_json::Value>],
) {
    for envelope in envelopes {
        let subject = subject_for(&envelope.event_type);
        let payload = match serde_json::to_vec(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(event_id = %envelope.event_id, error = %e, "failed to serialize event");
                continue;
            }
        };

        match bus.publish(&subject, payload).await {
            Ok(()) => {
                if let Err(e) = mark_published(pool, &envelope.partition_key, envelope.event_id).await
                {
                    tracing::warn!(event_id = %envelope.event_id, error = %e, "failed to mark event published");
                }
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %envelope.event_id,
                    subject = %subject,
                    error = %e,
                    "fast-path publish failed, leaving event for background publisher"
                );
            }
        }
    }
}

/// Unpublished outbox row, in insertion order
#[derive(Debug, FromRow)]
pub struct UnpublishedEvent {
    pub id: i64,
    pub tenant_id: String,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Fetch unpublished events oldest-first (insertion order per partition key)
pub async fn fetch_unpublished(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<UnpublishedEvent>, sqlx::Error> {
    sqlx::query_as::<_, UnpublishedEvent>(
        r#"
        SELECT id, tenant_id, event_id, event_type, payload
        FROM outbox_events
        WHERE published_at IS NULL
        ORDER BY id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn mark_published(
    pool: &PgPool,
    tenant_id: &str,
    event_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE outbox_events SET published_at = NOW() WHERE tenant_id = $1 AND event_id = $2",
    )
    .bind(tenant_id)
    .bind(event_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_shape() {
        assert_eq!(
            subject_for("invoice.posted"),
            "cashflow.events.invoice.posted"
        );
        assert_eq!(
            subject_for("journal.entry.created"),
            "cashflow.events.journal.entry.created"
        );
    }
}
