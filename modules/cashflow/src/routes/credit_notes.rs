//! Credit note routes: CRUD, approve/post/adjust/void, refunds

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
use crate::repos::credit_note_repo;
use crate::routes::invoices::optional_json;
use crate::services::credit_note_service;
use crate::validation::{CreditNoteRequest, RefundRequest, VoidRequest};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/credit-notes",
            post(create_credit_note).get(list_credit_notes),
        )
        .route(
            "/companies/{tenant_id}/credit-notes/{id}",
            get(get_credit_note)
                .put(update_credit_note)
                .delete(delete_credit_note),
        )
        .route(
            "/companies/{tenant_id}/credit-notes/{id}/approve",
            post(approve_credit_note),
        )
        .route(
            "/companies/{tenant_id}/credit-notes/{id}/post",
            post(post_credit_note),
        )
        .route(
            "/companies/{tenant_id}/credit-notes/{id}/adjust",
            post(adjust_credit_note),
        )
        .route(
            "/companies/{tenant_id}/credit-notes/{id}/void",
            post(void_credit_note),
        )
        .route(
            "/companies/{tenant_id}/credit-notes/{id}/refunds",
            post(refund_credit_note).get(list_refunds),
        )
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &serde_json::Value) -> DomainResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))
}

async fn create_credit_note(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: CreditNoteRequest = parse_body(&body)?;
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

async fn update_credit_note(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: CreditNoteRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || credit_note_service::update_credit_note(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn delete_credit_note(
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
        &idempotency::fingerprint(&json!({ "action": "credit_note.delete", "id": id })),
        || credit_note_service::delete_credit_note(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn approve_credit_note(
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
        &idempotency::fingerprint(&json!({ "action": "credit_note.approve", "id": id })),
        || credit_note_service::approve_credit_note(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn post_credit_note(
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
        &idempotency::fingerprint(&json!({ "action": "credit_note.post", "id": id })),
        || credit_note_service::post_credit_note(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn adjust_credit_note(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: CreditNoteRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || credit_note_service::adjust_credit_note(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn void_credit_note(
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
        &idempotency::fingerprint(&json!({ "action": "credit_note.void", "id": id, "body": raw })),
        || credit_note_service::void_credit_note(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn refund_credit_note(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: RefundRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || credit_note_service::refund_credit_note(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_credit_note(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let note = credit_note_repo::fetch(&state.pool, &tenant_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("credit note not found"))?;
    let lines = credit_note_repo::fetch_lines(&state.pool, &tenant_id, id).await?;

    Ok(Json(credit_note_service::credit_note_json(&note, &lines)))
}

async fn list_credit_notes(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let notes = credit_note_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = notes
        .iter()
        .map(|note| credit_note_service::credit_note_json(note, &[]))
        .collect();

    Ok(Json(json!(body)))
}

async fn list_refunds(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let refunds = credit_note_repo::list_refunds(&state.pool, &tenant_id, id).await?;
    let body: Vec<_> = refunds
        .iter()
        .map(|refund| {
            json!({
                "id": refund.id,
                "creditNoteId": refund.credit_note_id,
                "amount": refund.amount,
                "refundDate": refund.refund_date,
                "bankAccountId": refund.bank_account_id,
                "journalEntryId": refund.journal_entry_id,
                "createdBy": refund.created_by,
                "createdAt": refund.created_at,
            })
        })
        .collect();

    Ok(Json(json!(body)))
}
