//! Domain error taxonomy and HTTP translation
//!
//! Every precondition failure in the core is a `DomainError` carrying an
//! HTTP-style status; the route boundary renders it as `{"error": message}`.
//! Infrastructure failures map to 500 and never leak internals to the caller.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

/// Errors surfaced by the transactional core
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    /// Invalid input, state-machine violation, or policy rejection (400)
    #[error("{0}")]
    Validation(String),

    /// Referenced entity absent within the tenant (404)
    #[error("{0}")]
    NotFound(String),

    /// Request identity missing (401)
    #[error("{0}")]
    Unauthorized(String),

    /// Role does not permit the action (403)
    #[error("{0}")]
    Forbidden(String),

    /// Duplicate reversal, idempotency in-flight, concurrent conflict (409)
    #[error("{0}")]
    Conflict(String),

    /// Database failure (500)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Any other infrastructure failure (500)
    #[error("{0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status this error renders as
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message rendered to the caller
    ///
    /// 500-class errors are masked; the detail goes to the log only.
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Internal server error".to_string()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the error is a cacheable domain outcome (not infrastructure)
    pub fn is_domain_failure(&self) -> bool {
        !matches!(self, Self::Database(_) | Self::Internal(_))
    }
}

/// Error response body: `{"error": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for DomainError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            error: self.public_message(),
        });
        (status, body).into_response()
    }
}

/// Result alias used across services
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DomainError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DomainError::not_found("gone").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DomainError::conflict("busy").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DomainError::Unauthorized("who".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            DomainError::Forbidden("no".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DomainError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err = DomainError::internal("secret detail");
        assert_eq!(err.public_message(), "Internal server error");

        let err = DomainError::validation("amount cannot exceed remaining balance of 40.00");
        assert_eq!(
            err.public_message(),
            "amount cannot exceed remaining balance of 40.00"
        );
    }

    #[test]
    fn test_domain_failures_are_cacheable() {
        assert!(DomainError::validation("x").is_domain_failure());
        assert!(DomainError::conflict("x").is_domain_failure());
        assert!(!DomainError::internal("x").is_domain_failure());
    }
}
