//! Cross-document payment listings

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::DomainError;
use crate::repos::payment_repo::{self, PaymentDocKind};
use crate::services::payment_service;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/sales/payments",
            get(list_sales_payments),
        )
        .route(
            "/companies/{tenant_id}/purchases/payments",
            get(list_purchase_payments),
        )
}

/// All customer payments (invoice payments), newest first
async fn list_sales_payments(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let payments = payment_repo::list_all(&state.pool, &tenant_id, PaymentDocKind::Invoice).await?;
    let body: Vec<_> = payments
        .iter()
        .map(|p| payment_service::payment_json(p, "invoiceId"))
        .collect();

    Ok(Json(json!(body)))
}

/// All outgoing payments: expense payments and purchase bill payments
async fn list_purchase_payments(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let expense_payments =
        payment_repo::list_all(&state.pool, &tenant_id, PaymentDocKind::Expense).await?;
    let bill_payments =
        payment_repo::list_all(&state.pool, &tenant_id, PaymentDocKind::PurchaseBill).await?;

    let mut body: Vec<_> = expense_payments
        .iter()
        .map(|p| payment_service::payment_json(p, "expenseId"))
        .collect();
    body.extend(
        bill_payments
            .iter()
            .map(|p| payment_service::payment_json(p, "purchaseBillId")),
    );

    Ok(Json(json!(body)))
}
