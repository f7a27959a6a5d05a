//! Command idempotency store
//!
//! Every mutating endpoint runs through [`run`]: exactly one caller per
//! (tenant, key) claims the IN_FLIGHT row and executes the command; late
//! arrivals replay the cached response byte-for-byte. Terminal outcomes
//! (DONE and domain FAILED) are both cached, so a retry never re-executes a
//! command that already reached a terminal state. The stored response is
//! returned verbatim regardless of the retry's body; the request hash is
//! kept for observability only.

use std::future::Future;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::{DomainError, DomainResult};
use crate::repos::idempotency_repo::{self, STATUS_DONE, STATUS_FAILED, STATUS_IN_FLIGHT};

/// An IN_FLIGHT row older than this is assumed wedged; callers get a 409
/// instead of waiting on it
const IN_FLIGHT_WINDOW: Duration = Duration::from_secs(30);

/// How long a caller will wait for a fresh concurrent attempt to finish
const WAIT_BUDGET: Duration = Duration::from_secs(2);

const WAIT_POLL: Duration = Duration::from_millis(250);

/// Serialized command response, cached for replay
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl CommandResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn created(body: serde_json::Value) -> Self {
        Self {
            status_code: 201,
            body,
        }
    }
}

impl IntoResponse for CommandResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self.body)).into_response()
    }
}

/// Outcome of an idempotent command attempt
#[derive(Debug, Clone)]
pub struct IdempotentOutcome {
    /// True when the response came from the cache instead of execution
    pub replay: bool,
    pub response: CommandResponse,
}

/// Extract the mandatory `Idempotency-Key` header
pub fn require_key(headers: &HeaderMap) -> DomainResult<String> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DomainError::validation("Idempotency-Key header is required"))
}

/// Fingerprint of the request body, stored alongside the record
pub fn fingerprint(body: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

/// Run a command at most once per (tenant, key)
pub async fn run<F, Fut>(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
    request_hash: &str,
    f: F,
) -> DomainResult<IdempotentOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = DomainResult<CommandResponse>>,
{
    if idempotency_repo::try_insert_in_flight(pool, tenant_id, key, request_hash).await? {
        return execute_and_record(pool, tenant_id, key, f).await;
    }

    // Lost the claim race; read the winner's row. A missing row means the
    // earlier claim was released (infrastructure failure), so claim again.
    let mut record = idempotency_repo::fetch(pool, tenant_id, key).await?;
    if record.is_none() {
        if idempotency_repo::try_insert_in_flight(pool, tenant_id, key, request_hash).await? {
            return execute_and_record(pool, tenant_id, key, f).await;
        }
        record = idempotency_repo::fetch(pool, tenant_id, key).await?;
    }

    let Some(record) = record else {
        return Err(DomainError::conflict(
            "a request with this idempotency key is already in progress",
        ));
    };

    match record.status.as_str() {
        STATUS_DONE | STATUS_FAILED => Ok(replay_of(&record)),
        STATUS_IN_FLIGHT => {
            let age = Utc::now().signed_duration_since(record.created_at);
            if age.num_seconds() >= IN_FLIGHT_WINDOW.as_secs() as i64 {
                return Err(DomainError::conflict(
                    "a request with this idempotency key is already in progress",
                ));
            }
            wait_for_completion(pool, tenant_id, key).await
        }
        other => Err(DomainError::internal(format!(
            "unexpected idempotency status: {other}"
        ))),
    }
}

async fn execute_and_record<F, Fut>(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
    f: F,
) -> DomainResult<IdempotentOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = DomainResult<CommandResponse>>,
{
    match f().await {
        Ok(response) => {
            idempotency_repo::mark_done(
                pool,
                tenant_id,
                key,
                response.status_code as i32,
                &response.body,
            )
            .await?;

            Ok(IdempotentOutcome {
                replay: false,
                response,
            })
        }
        Err(err) if err.is_domain_failure() => {
            let status = err.status_code().as_u16() as i32;
            let body = serde_json::json!({ "error": err.public_message() });
            idempotency_repo::mark_failed(pool, tenant_id, key, status, &body).await?;
            Err(err)
        }
        Err(err) => {
            // Infrastructure failure: release the claim so the client can
            // retry with the same key once the fault clears.
            if let Err(cleanup) = idempotency_repo::delete_in_flight(pool, tenant_id, key).await {
                tracing::warn!(error = %cleanup, "failed to release in-flight idempotency claim");
            }
            Err(err)
        }
    }
}

/// Fresh concurrent attempt: block briefly, then replay or 409
async fn wait_for_completion(
    pool: &PgPool,
    tenant_id: &str,
    key: &str,
) -> DomainResult<IdempotentOutcome> {
    let deadline = tokio::time::Instant::now() + WAIT_BUDGET;

    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(WAIT_POLL).await;

        if let Some(record) = idempotency_repo::fetch(pool, tenant_id, key).await? {
            if record.status == STATUS_DONE || record.status == STATUS_FAILED {
                return Ok(replay_of(&record));
            }
        }
    }

    Err(DomainError::conflict(
        "a request with this idempotency key is already in progress",
    ))
}

fn replay_of(record: &idempotency_repo::IdempotencyRecord) -> IdempotentOutcome {
    IdempotentOutcome {
        replay: true,
        response: CommandResponse {
            status_code: record.status_code.unwrap_or(200) as u16,
            body: record
                .response_body
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = serde_json::json!({"amount": "60.00", "bankAccountId": "b1"});
        let b = serde_json::json!({"amount": "60.00", "bankAccountId": "b1"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_differs_on_body_change() {
        let a = serde_json::json!({"amount": "60.00"});
        let b = serde_json::json!({"amount": "60.01"});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_require_key_missing_is_validation_error() {
        let headers = HeaderMap::new();
        let err = require_key(&headers).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_require_key_present() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", "k1".parse().unwrap());
        assert_eq!(require_key(&headers).unwrap(), "k1");
    }
}
