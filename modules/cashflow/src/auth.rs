//! Request identity and role gate
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user as `X-User-Id` and `X-User-Role` headers. This module turns those
//! into a typed `AuthUser` and enforces the role policy. Tenant scoping is
//! NOT decided here; the path `tenant_id` is the only tenant authority and
//! every repository query filters by it.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::DomainError;

/// Roles recognized by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Accountant,
    Clerk,
    Viewer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.to_ascii_uppercase().as_str() {
            "OWNER" => Some(Role::Owner),
            "ACCOUNTANT" => Some(Role::Accountant),
            "CLERK" => Some(Role::Clerk),
            "VIEWER" => Some(Role::Viewer),
            _ => None,
        }
    }

    /// Whether this role may execute mutating commands
    pub fn can_write(self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

/// Authenticated caller, extracted from gateway headers
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
}

impl AuthUser {
    /// Reject unless the role may mutate state
    pub fn require_write(&self) -> Result<(), DomainError> {
        if self.role.can_write() {
            Ok(())
        } else {
            Err(DomainError::Forbidden(
                "role does not permit this action".to_string(),
            ))
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = DomainError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DomainError::Unauthorized("missing user identity".to_string()))?
            .to_string();

        let role_raw = parts
            .headers
            .get("X-User-Role")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("VIEWER");

        let role = Role::parse(role_raw)
            .ok_or_else(|| DomainError::Forbidden(format!("unknown role: {role_raw}")))?;

        Ok(AuthUser { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("OWNER"), Some(Role::Owner));
        assert_eq!(Role::parse("accountant"), Some(Role::Accountant));
        assert_eq!(Role::parse("Clerk"), Some(Role::Clerk));
        assert_eq!(Role::parse("VIEWER"), Some(Role::Viewer));
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn test_write_policy() {
        assert!(Role::Owner.can_write());
        assert!(Role::Accountant.can_write());
        assert!(Role::Clerk.can_write());
        assert!(!Role::Viewer.can_write());
    }

    #[test]
    fn test_require_write_rejects_viewer() {
        let viewer = AuthUser {
            user_id: "u1".to_string(),
            role: Role::Viewer,
        };
        assert!(viewer.require_write().is_err());

        let clerk = AuthUser {
            user_id: "u1".to_string(),
            role: Role::Clerk,
        };
        assert!(clerk.require_write().is_ok());
    }
}
