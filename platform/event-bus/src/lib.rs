//! # EventBus Abstraction
//!
//! Pub/sub messaging used by the outbox fast-path publish and the background
//! outbox publisher.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation backed by a NATS client
//! - **InMemoryBus**: test/dev implementation backed by tokio broadcast channels
//!
//! The choice is config-driven (`BUS_TYPE=nats|inmemory`), so tests and local
//! development run without a broker.

mod envelope;
mod inmemory_bus;
mod nats_bus;

pub use envelope::{validate_envelope, EventEnvelope, SCHEMA_VERSION};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to subscribe to subject: {0}")]
    Subscribe(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core publish-subscribe abstraction
///
/// Subjects are dot-separated (e.g. `cashflow.events.invoice.posted`).
/// Subscription patterns support NATS-style wildcards: `*` matches a single
/// token, `>` matches one or more trailing tokens.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload to a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}
