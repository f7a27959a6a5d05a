//! Customer CRUD with opening-balance posting on create and edit

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::events;
use crate::idempotency::{self, CommandResponse};
use crate::money::round_money;
use crate::repos::customer_repo::{self, Customer};
use crate::repos::{audit_repo, company_repo};
use crate::services::opening_balance;
use crate::validation::PartyRequest;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/customers",
            post(create_customer).get(list_customers),
        )
        .route(
            "/companies/{tenant_id}/customers/{id}",
            get(get_customer).put(update_customer),
        )
}

fn customer_json(customer: &Customer) -> serde_json::Value {
    json!({
        "id": customer.id,
        "name": customer.name,
        "email": customer.email,
        "phone": customer.phone,
        "openingBalance": customer.opening_balance,
        "isActive": customer.is_active,
        "createdAt": customer.created_at,
        "updatedAt": customer.updated_at,
    })
}

fn parse_request(body: &serde_json::Value) -> DomainResult<PartyRequest> {
    let request: PartyRequest = serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))?;
    if request.name.trim().is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    Ok(request)
}

async fn create_customer(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request = parse_request(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || async {
            let opening_balance = round_money(request.opening_balance.unwrap_or(Decimal::ZERO));
            let customer_id = Uuid::new_v4();

            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;

            customer_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                customer_id,
                request.name.trim(),
                request.email.as_deref(),
                request.phone.as_deref(),
                opening_balance,
            )
            .await?;

            let posted = opening_balance::post_customer_delta(
                &mut tx,
                &ctx,
                &company,
                customer_id,
                Decimal::ZERO,
                opening_balance,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "customer.create",
                "Customer",
                &customer_id.to_string(),
                Some(json!({ "openingBalance": opening_balance })),
            )
            .await?;

            let envelopes: Vec<_> = posted.into_iter().map(|p| p.envelope).collect();
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let customer = customer_repo::find_by_id(&state.pool, &ctx.tenant_id, customer_id)
                .await?
                .ok_or_else(|| DomainError::internal("customer row missing after commit"))?;
            Ok(CommandResponse::created(customer_json(&customer)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn update_customer(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(String, Uuid)>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request = parse_request(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            customer_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, customer_id)
                .await?
                .ok_or_else(|| DomainError::not_found("customer not found"))?;
            let existing = customer_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, customer_id)
                .await?
                .ok_or_else(|| DomainError::not_found("customer not found"))?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;

            let new_balance = round_money(
                request
                    .opening_balance
                    .unwrap_or(existing.opening_balance),
            );

            customer_repo::update_tx(
                &mut tx,
                &ctx.tenant_id,
                customer_id,
                request.name.trim(),
                request.email.as_deref(),
                request.phone.as_deref(),
                new_balance,
            )
            .await?;

            // Only the delta posts
            let posted = opening_balance::post_customer_delta(
                &mut tx,
                &ctx,
                &company,
                customer_id,
                existing.opening_balance,
                new_balance,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "customer.update",
                "Customer",
                &customer_id.to_string(),
                Some(json!({
                    "previousOpeningBalance": existing.opening_balance,
                    "openingBalance": new_balance,
                })),
            )
            .await?;

            let envelopes: Vec<_> = posted.into_iter().map(|p| p.envelope).collect();
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let customer = customer_repo::find_by_id(&state.pool, &ctx.tenant_id, customer_id)
                .await?
                .ok_or_else(|| DomainError::internal("customer row missing after commit"))?;
            Ok(CommandResponse::ok(customer_json(&customer)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_customer(
    State(state): State<AppState>,
    Path((tenant_id, customer_id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let customer = customer_repo::find_by_id(&state.pool, &tenant_id, customer_id)
        .await?
        .ok_or_else(|| DomainError::not_found("customer not found"))?;

    Ok(Json(customer_json(&customer)))
}

async fn list_customers(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let customers = customer_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = customers.iter().map(customer_json).collect();

    Ok(Json(json!(body)))
}
