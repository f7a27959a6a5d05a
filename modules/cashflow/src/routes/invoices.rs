//! Invoice routes: CRUD, approve/post/adjust/void, payments, linked credit
//! notes

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
use crate::repos::invoice_repo;
use crate::services::credit_note_service;
use crate::services::invoice_service;
use crate::services::payment_service;
use crate::validation::{
    CreditNoteRequest, InvoiceRequest, PaymentRequest, ReversalRequest, VoidRequest,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/invoices",
            post(create_invoice).get(list_invoices),
        )
        .route(
            "/companies/{tenant_id}/invoices/{id}",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .route(
            "/companies/{tenant_id}/invoices/{id}/approve",
            post(approve_invoice),
        )
        .route("/companies/{tenant_id}/invoices/{id}/post", post(post_invoice))
        .route(
            "/companies/{tenant_id}/invoices/{id}/adjust",
            post(adjust_invoice),
        )
        .route("/companies/{tenant_id}/invoices/{id}/void", post(void_invoice))
        .route(
            "/companies/{tenant_id}/invoices/{id}/payments",
            post(record_payment).get(list_payments),
        )
        .route(
            "/companies/{tenant_id}/invoices/{id}/payments/{pid}/reverse",
            post(reverse_payment),
        )
        .route(
            "/companies/{tenant_id}/invoices/{id}/credit-notes",
            post(create_linked_credit_note),
        )
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &serde_json::Value) -> DomainResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))
}

/// Action endpoints accept an empty body; anything present must be JSON
pub(crate) fn optional_json(bytes: &Bytes) -> DomainResult<serde_json::Value> {
    if bytes.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))
}

async fn create_invoice(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: InvoiceRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || invoice_service::create_invoice(&state, &ctx, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn update_invoice(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: InvoiceRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || invoice_service::update_invoice(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn delete_invoice(
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
        &idempotency::fingerprint(&json!({ "action": "invoice.delete", "id": id })),
        || invoice_service::delete_invoice(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn approve_invoice(
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
        &idempotency::fingerprint(&json!({ "action": "invoice.approve", "id": id })),
        || invoice_service::approve_invoice(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn post_invoice(
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
        &idempotency::fingerprint(&json!({ "action": "invoice.post", "id": id })),
        || invoice_service::post_invoice(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn adjust_invoice(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: InvoiceRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || invoice_service::adjust_invoice(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn void_invoice(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let raw = optional_json(&bytes)?;
    let request: VoidRequest = parse_body(&raw)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&json!({ "action": "invoice.void", "id": id, "body": raw })),
        || invoice_service::void_invoice(&state, &ctx, id, request),
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
        || payment_service::record_invoice_payment(&state, &ctx, id, request),
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
            &json!({ "action": "payment.reverse", "paymentId": payment_id, "body": raw }),
        ),
        || payment_service::reverse_invoice_payment(&state, &ctx, id, payment_id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

/// Create a credit note pre-linked to this invoice
async fn create_linked_credit_note(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let mut request: CreditNoteRequest = parse_body(&body)?;
    request.invoice_id = Some(id);
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || credit_note_service::create_credit_note(&state, &ctx, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_invoice(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let invoice = invoice_repo::fetch(&state.pool, &tenant_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("invoice not found"))?;
    let lines = invoice_repo::fetch_lines(&state.pool, &tenant_id, id).await?;

    Ok(Json(invoice_service::invoice_json(&invoice, &lines)))
}

async fn list_invoices(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let invoices = invoice_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = invoices
        .iter()
        .map(|invoice| invoice_service::invoice_json(invoice, &[]))
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
        payment_repo::list_for_parent(&state.pool, &tenant_id, PaymentDocKind::Invoice, id).await?;
    let body: Vec<_> = payments
        .iter()
        .map(|p| payment_service::payment_json(p, "invoiceId"))
        .collect();

    Ok(Json(json!(body)))
}
