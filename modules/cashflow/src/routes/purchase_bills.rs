//! Purchase bill routes: CRUD, post, payments

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::idempotency;
use crate::repos::purchase_bill_repo;
use crate::routes::invoices::optional_json;
use crate::services::payment_service;
use crate::services::purchase_bill_service;
use crate::validation::{PaymentRequest, PurchaseBillRequest, ReversalRequest};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/purchase-bills",
            post(create_purchase_bill).get(list_purchase_bills),
        )
        .route(
            "/companies/{tenant_id}/purchase-bills/{id}",
            get(get_purchase_bill).put(update_purchase_bill),
        )
        .route(
            "/companies/{tenant_id}/purchase-bills/{id}/post",
            post(post_purchase_bill),
        )
        .route(
            "/companies/{tenant_id}/purchase-bills/{id}/payments",
            post(record_payment).get(list_payments),
        )
        .route(
            "/companies/{tenant_id}/purchase-bills/{id}/payments/{pid}/reverse",
            post(reverse_payment),
        )
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &serde_json::Value) -> DomainResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))
}

async fn create_purchase_bill(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: PurchaseBillRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || purchase_bill_service::create_purchase_bill(&state, &ctx, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn update_purchase_bill(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: PurchaseBillRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || purchase_bill_service::update_purchase_bill(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn post_purchase_bill(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&json!({ "action": "bill.post", "id": id })),
        || purchase_bill_service::post_purchase_bill(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn record_payment(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: PaymentRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || payment_service::record_bill_payment(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn reverse_payment(
    State(state): State<AppState>,
    Path((tenant_id, id, payment_id)): Path<(String, Uuid, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let raw = optional_json(&bytes)?;
    let request: ReversalRequest = parse_body(&raw)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(
            &json!({ "action": "bill.payment.reverse", "paymentId": payment_id, "body": raw }),
        ),
        || payment_service::reverse_bill_payment(&state, &ctx, id, payment_id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_purchase_bill(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let bill = purchase_bill_repo::fetch(&state.pool, &tenant_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;
    let lines = purchase_bill_repo::fetch_lines(&state.pool, &tenant_id, id).await?;

    Ok(Json(purchase_bill_service::purchase_bill_json(&bill, &lines)))
}

async fn list_purchase_bills(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let bills = purchase_bill_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = bills
        .iter()
        .map(|bill| purchase_bill_service::purchase_bill_json(bill, &[]))
        .collect();

    Ok(Json(json!(body)))
}

async fn list_payments(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    use crate::repos::payment_repo::{self, PaymentDocKind};

    let payments =
        payment_repo::list_for_parent(&state.pool, &tenant_id, PaymentDocKind::PurchaseBill, id)
            .await?;
    let body: Vec<_> = payments
        .iter()
        .map(|p| payment_service::payment_json(p, "purchaseBillId"))
        .collect();

    Ok(Json(json!(body)))
}
