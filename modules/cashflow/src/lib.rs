pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod events;
pub mod health;
pub mod idempotency;
pub mod locks;
pub mod money;
pub mod repos;
pub mod routes;
pub mod services;
pub mod validation;

use std::sync::Arc;

use event_bus::EventBus;
use sqlx::PgPool;

use crate::locks::LockManager;

/// Shared application state handed to every route handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub bus: Arc<dyn EventBus>,
    pub locks: LockManager,
}
