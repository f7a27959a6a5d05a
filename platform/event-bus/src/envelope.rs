//! # Event Envelope
//!
//! Wire shape of every event the service emits through the transactional
//! outbox. Consumers dedupe by `event_id`; ordering is only guaranteed per
//! `partition_key` (the tenant id).
//!
//! ## Envelope Fields
//!
//! - `event_id`: unique identifier, the consumer-side dedupe key
//! - `event_type`: dotted lowercase name (e.g. `invoice.posted`)
//! - `schema_version`: payload schema revision, currently `v1`
//! - `occurred_at`: timestamp the fact was recorded
//! - `source`: producing service, always `cashflow-api`
//! - `partition_key`: tenant id; events sharing it are ordered
//! - `correlation_id`: links all events of one business command
//! - `causation_id`: the command/event that caused this one, when known
//! - `aggregate_type` / `aggregate_id`: the document the event is about
//! - `type`: PascalCase event name for consumers that dispatch on it
//! - `payload`: event-specific data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current payload schema revision
pub const SCHEMA_VERSION: &str = "v1";

/// Service name stamped into `source`
const SOURCE: &str = "cashflow-api";

/// Standard envelope wrapping every outbox event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<T> {
    /// Unique event identifier (consumer dedupe key)
    pub event_id: Uuid,

    /// Dotted lowercase event name, e.g. `journal.entry.created`
    pub event_type: String,

    /// Payload schema revision
    pub schema_version: String,

    /// Timestamp the event was generated
    pub occurred_at: DateTime<Utc>,

    /// Producing service identifier
    pub source: String,

    /// Tenant id; per-key ordering guarantee
    pub partition_key: String,

    /// Links related events in a business transaction
    pub correlation_id: Uuid,

    /// The command/event that caused this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,

    /// Aggregate kind the event is about, e.g. `Invoice`
    pub aggregate_type: String,

    /// Aggregate identifier within the tenant
    pub aggregate_id: String,

    /// PascalCase event name, e.g. `InvoicePosted`
    #[serde(rename = "type")]
    pub type_name: String,

    /// Event-specific payload
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a fresh `event_id` and `occurred_at = now`
    pub fn new(
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        correlation_id: Uuid,
        payload: T,
    ) -> Self {
        let event_type = event_type.into();
        let type_name = pascal_case(&event_type);
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            schema_version: SCHEMA_VERSION.to_string(),
            occurred_at: Utc::now(),
            source: SOURCE.to_string(),
            partition_key: tenant_id.into(),
            correlation_id,
            causation_id: None,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            type_name,
            payload,
        }
    }

    /// Set the causation id
    pub fn with_causation_id(mut self, causation_id: Option<Uuid>) -> Self {
        self.causation_id = causation_id;
        self
    }
}

/// Render a dotted lowercase event type as PascalCase
///
/// `journal.entry.created` → `JournalEntryCreated`; underscores inside a
/// token are also treated as word breaks (`credit_note.posted` →
/// `CreditNotePosted`).
fn pascal_case(event_type: &str) -> String {
    event_type
        .split(['.', '_'])
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Validate a serialized envelope before publishing
///
/// Checks the fields a consumer cannot recover from losing: `eventId`,
/// `occurredAt`, a non-empty `partitionKey`, and a non-empty `eventType`.
pub fn validate_envelope(envelope: &serde_json::Value) -> Result<(), String> {
    envelope
        .get("eventId")
        .and_then(|v| v.as_str())
        .ok_or("missing or invalid eventId")?;

    envelope
        .get("occurredAt")
        .and_then(|v| v.as_str())
        .ok_or("missing or invalid occurredAt")?;

    let partition_key = envelope
        .get("partitionKey")
        .and_then(|v| v.as_str())
        .ok_or("missing or invalid partitionKey")?;
    if partition_key.is_empty() {
        return Err("partitionKey cannot be empty".to_string());
    }

    let event_type = envelope
        .get("eventType")
        .and_then(|v| v.as_str())
        .ok_or("missing or invalid eventType")?;
    if event_type.is_empty() {
        return Err("eventType cannot be empty".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let correlation_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(
            "tenant-1",
            "invoice.posted",
            "Invoice",
            "inv-42",
            correlation_id,
            json!({"total": "100.00"}),
        );

        assert_eq!(envelope.partition_key, "tenant-1");
        assert_eq!(envelope.event_type, "invoice.posted");
        assert_eq!(envelope.type_name, "InvoicePosted");
        assert_eq!(envelope.schema_version, "v1");
        assert_eq!(envelope.source, "cashflow-api");
        assert_eq!(envelope.correlation_id, correlation_id);
        assert!(envelope.causation_id.is_none());
    }

    #[test]
    fn test_pascal_case_handles_dots_and_underscores() {
        assert_eq!(pascal_case("journal.entry.created"), "JournalEntryCreated");
        assert_eq!(pascal_case("credit_note.posted"), "CreditNotePosted");
        assert_eq!(pascal_case("bill.payment.recorded"), "BillPaymentRecorded");
        assert_eq!(
            pascal_case("inventory.recalc.requested"),
            "InventoryRecalcRequested"
        );
    }

    #[test]
    fn test_type_field_serializes_as_type() {
        let envelope = EventEnvelope::new(
            "tenant-1",
            "payment.recorded",
            "Payment",
            "pay-1",
            Uuid::new_v4(),
            json!({}),
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value.get("type").unwrap(), "PaymentRecorded");
        assert!(value.get("typeName").is_none());
        // wire shape is camelCase
        assert!(value.get("eventId").is_some());
        assert!(value.get("partitionKey").is_some());
        assert!(value.get("schemaVersion").is_some());
    }

    #[test]
    fn test_validate_envelope_valid() {
        let envelope = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "occurredAt": "2026-01-01T00:00:00Z",
            "partitionKey": "tenant-1",
            "eventType": "invoice.posted",
            "payload": {}
        });

        assert!(validate_envelope(&envelope).is_ok());
    }

    #[test]
    fn test_validate_envelope_missing_partition_key() {
        let envelope = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "occurredAt": "2026-01-01T00:00:00Z",
            "eventType": "invoice.posted"
        });

        assert!(validate_envelope(&envelope).is_err());
    }

    #[test]
    fn test_validate_envelope_empty_event_type() {
        let envelope = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "occurredAt": "2026-01-01T00:00:00Z",
            "partitionKey": "tenant-1",
            "eventType": ""
        });

        assert!(validate_envelope(&envelope).is_err());
    }
}
