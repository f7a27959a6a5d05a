//! Expense routes: CRUD, approve/post/adjust/void, payments

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
use crate::repos::expense_repo;
use crate::routes::invoices::optional_json;
use crate::services::expense_service;
use crate::services::payment_service;
use crate::validation::{
    ExpenseRequest, PaymentRequest, PostExpenseRequest, ReversalRequest, VoidRequest,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/expenses",
            post(create_expense).get(list_expenses),
        )
        .route(
            "/companies/{tenant_id}/expenses/{id}",
            get(get_expense).put(update_expense).delete(delete_expense),
        )
        .route(
            "/companies/{tenant_id}/expenses/{id}/approve",
            post(approve_expense),
        )
        .route("/companies/{tenant_id}/expenses/{id}/post", post(post_expense))
        .route(
            "/companies/{tenant_id}/expenses/{id}/adjust",
            post(adjust_expense),
        )
        .route("/companies/{tenant_id}/expenses/{id}/void", post(void_expense))
        .route(
            "/companies/{tenant_id}/expenses/{id}/payments",
            post(record_payment).get(list_payments),
        )
        .route(
            "/companies/{tenant_id}/expenses/{id}/payments/{pid}/reverse",
            post(reverse_payment),
        )
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &serde_json::Value) -> DomainResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))
}

async fn create_expense(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: ExpenseRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || expense_service::create_expense(&state, &ctx, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn update_expense(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: ExpenseRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || expense_service::update_expense(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn delete_expense(
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
        &idempotency::fingerprint(&json!({ "action": "expense.delete", "id": id })),
        || expense_service::delete_expense(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn approve_expense(
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
        &idempotency::fingerprint(&json!({ "action": "expense.approve", "id": id })),
        || expense_service::approve_expense(&state, &ctx, id),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn post_expense(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let raw = optional_json(&bytes)?;
    let request: PostExpenseRequest = parse_body(&raw)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&json!({ "action": "expense.post", "id": id, "body": raw })),
        || expense_service::post_expense(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn adjust_expense(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: ExpenseRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || expense_service::adjust_expense(&state, &ctx, id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn void_expense(
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
        &idempotency::fingerprint(&json!({ "action": "expense.void", "id": id, "body": raw })),
        || expense_service::void_expense(&state, &ctx, id, request),
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
        || payment_service::record_expense_payment(&state, &ctx, id, request),
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
            &json!({ "action": "expense.payment.reverse", "paymentId": payment_id, "body": raw }),
        ),
        || payment_service::reverse_expense_payment(&state, &ctx, id, payment_id, request),
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_expense(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let expense = expense_repo::fetch(&state.pool, &tenant_id, id)
        .await?
        .ok_or_else(|| DomainError::not_found("expense not found"))?;
    let lines = expense_repo::fetch_lines(&state.pool, &tenant_id, id).await?;

    Ok(Json(expense_service::expense_json(&expense, &lines)))
}

async fn list_expenses(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let expenses = expense_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = expenses
        .iter()
        .map(|expense| expense_service::expense_json(expense, &[]))
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
        payment_repo::list_for_parent(&state.pool, &tenant_id, PaymentDocKind::Expense, id).await?;
    let body: Vec<_> = payments
        .iter()
        .map(|p| payment_service::payment_json(p, "expenseId"))
        .collect();

    Ok(Json(json!(body)))
}
