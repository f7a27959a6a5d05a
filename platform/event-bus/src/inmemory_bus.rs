//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

/// EventBus implementation using tokio broadcast channels
///
/// Suitable for unit tests and local development without a broker. Messages
/// are broadcast to all subscribers; each subscriber filters by its own
/// subject pattern.
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory bus with a 1000-message buffer
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check whether a subject matches a subscription pattern
    ///
    /// NATS-style wildcards: `*` matches exactly one token, `>` matches one
    /// or more trailing tokens.
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        let pattern_tokens: Vec<&str> = pattern.split('.').collect();

        let mut s_idx = 0;
        let mut p_idx = 0;

        while s_idx < subject_tokens.len() && p_idx < pattern_tokens.len() {
            let pattern_token = pattern_tokens[p_idx];

            if pattern_token == ">" {
                return true;
            } else if pattern_token == "*" || subject_tokens[s_idx] == pattern_token {
                s_idx += 1;
                p_idx += 1;
            } else {
                return false;
            }
        }

        s_idx == subject_tokens.len() && p_idx == pattern_tokens.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let msg = BusMessage::new(subject.to_string(), payload);

        // No receivers is fine; broadcast send only fails in that case
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "in-memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_pattern_matching() {
        // Exact match
        assert!(InMemoryBus::matches_pattern(
            "cashflow.events.invoice.posted",
            "cashflow.events.invoice.posted"
        ));

        // Single wildcard
        assert!(InMemoryBus::matches_pattern(
            "cashflow.events.invoice.posted",
            "cashflow.*.invoice.posted"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "cashflow.events.invoice.posted",
            "cashflow.*.posted"
        ));

        // Multi-level wildcard
        assert!(InMemoryBus::matches_pattern(
            "cashflow.events.invoice.posted",
            "cashflow.events.>"
        ));
        assert!(!InMemoryBus::matches_pattern(
            "cashflow.events.invoice.posted",
            "billing.>"
        ));

        // Edge cases
        assert!(InMemoryBus::matches_pattern("single", "single"));
        assert!(InMemoryBus::matches_pattern("single", "*"));
        assert!(InMemoryBus::matches_pattern("single", ">"));
        assert!(!InMemoryBus::matches_pattern("one.two", "one"));
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = InMemoryBus::new();

        // Subscribe before publishing
        let mut stream = bus.subscribe("cashflow.events.>").await.unwrap();

        let payload = b"test message".to_vec();
        bus.publish("cashflow.events.invoice.posted", payload.clone())
            .await
            .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.subject, "cashflow.events.invoice.posted");
        assert_eq!(msg.payload, payload);
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_matching_subjects() {
        let bus = InMemoryBus::new();

        let mut stream = bus.subscribe("cashflow.events.payment.*").await.unwrap();

        bus.publish("cashflow.events.invoice.posted", b"skip".to_vec())
            .await
            .unwrap();
        bus.publish("cashflow.events.payment.recorded", b"keep".to_vec())
            .await
            .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended");

        assert_eq!(msg.subject, "cashflow.events.payment.recorded");
        assert_eq!(msg.payload, b"keep".to_vec());
    }
}
