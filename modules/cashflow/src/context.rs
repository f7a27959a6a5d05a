//! Per-command write context
//!
//! One `WriteContext` is built at the request boundary and threaded through
//! every service call, so correlation metadata never lives in ad-hoc
//! closures and `occurred_at` timestamps agree across a single command.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity and correlation metadata for one mutating command
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub tenant_id: String,
    pub user_id: String,
    pub idempotency_key: String,
    pub correlation_id: Uuid,
    pub now: DateTime<Utc>,
}

impl WriteContext {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            idempotency_key: idempotency_key.into(),
            correlation_id: Uuid::new_v4(),
            now: Utc::now(),
        }
    }
}
