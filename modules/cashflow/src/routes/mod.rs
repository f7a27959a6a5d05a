//! HTTP surface
//!
//! All business routes are tenant-scoped under `/companies/{tenant_id}`.
//! Mutating handlers follow one shape: role gate → mandatory
//! `Idempotency-Key` → `WriteContext` → `idempotency::run` around the
//! service call, so a retried command replays its cached response.

pub mod companies;
pub mod credit_notes;
pub mod customers;
pub mod expenses;
pub mod invoices;
pub mod items;
pub mod payments;
pub mod purchase_bills;
pub mod vendors;

use axum::{routing::get, Router};

use crate::health::health;
use crate::AppState;

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .merge(companies::router())
        .merge(customers::router())
        .merge(vendors::router())
        .merge(items::router())
        .merge(invoices::router())
        .merge(credit_notes::router())
        .merge(expenses::router())
        .merge(purchase_bills::router())
        .merge(payments::router())
        .with_state(state)
}
