//! Background outbox publisher
//!
//! Polls the outbox for unpublished rows and publishes them to the event
//! bus, marking each row once the bus accepts it. The fast path in
//! `outbox::publish_after_commit` usually gets there first; this task is
//! the durable fallback that makes delivery at-least-once.

use std::sync::Arc;
use std::time::Duration;

use event_bus::EventBus;
use sqlx::PgPool;

use crate::events::outbox::{fetch_unpublished, mark_published, subject_for};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_SIZE: i64 = 100;

pub async fn run_publisher_task(pool: PgPool, bus: Arc<dyn EventBus>) {
    tracing::info!("starting outbox publisher task");

    let mut interval = tokio::time::interval(POLL_INTERVAL);

    loop {
        interval.tick().await;

        match publish_batch(&pool, &bus).await {
            Ok(count) if count > 0 => {
                tracing::debug!(count, "published events from outbox");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "outbox publish batch failed");
            }
        }
    }
}

async fn publish_batch(
    pool: &PgPool,
    bus: &Arc<dyn EventBus>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let events = fetch_unpublished(pool, BATCH_SIZE).await?;
    let count = events.len();

    for event in events {
        let subject = subject_for(&event.event_type);
        let payload = serde_json::to_vec(&event.payload)?;

        // Stop the batch on publish failure so per-partition insertion
        // order is preserved; the next tick retries from the same row.
        if let Err(e) = bus.publish(&subject, payload).await {
            tracing::error!(
                event_id = %event.event_id,
                subject = %subject,
                error = %e,
                "failed to publish event, will retry"
            );
            return Err(Box::new(e));
        }

        mark_published(pool, &event.tenant_id, event.event_id).await?;

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            subject = %subject,
            "event published"
        );
    }

    Ok(count)
}
