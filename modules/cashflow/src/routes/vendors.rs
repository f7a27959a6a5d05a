//! Vendor CRUD with opening-balance posting on create and edit

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
use crate::repos::vendor_repo::{self, Vendor};
use crate::repos::{audit_repo, company_repo};
use crate::services::opening_balance;
use crate::validation::PartyRequest;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/vendors",
            post(create_vendor).get(list_vendors),
        )
        .route(
            "/companies/{tenant_id}/vendors/{id}",
            get(get_vendor).put(update_vendor),
        )
}

fn vendor_json(vendor: &Vendor) -> serde_json::Value {
    json!({
        "id": vendor.id,
        "name": vendor.name,
        "email": vendor.email,
        "phone": vendor.phone,
        "openingBalance": vendor.opening_balance,
        "isActive": vendor.is_active,
        "createdAt": vendor.created_at,
        "updatedAt": vendor.updated_at,
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

async fn create_vendor(
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
            let vendor_id = Uuid::new_v4();

            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;

            vendor_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                vendor_id,
                request.name.trim(),
                request.email.as_deref(),
                request.phone.as_deref(),
                opening_balance,
            )
            .await?;

            let posted = opening_balance::post_vendor_delta(
                &mut tx,
                &ctx,
                &company,
                vendor_id,
                Decimal::ZERO,
                opening_balance,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "vendor.create",
                "Vendor",
                &vendor_id.to_string(),
                Some(json!({ "openingBalance": opening_balance })),
            )
            .await?;

            let envelopes: Vec<_> = posted.into_iter().map(|p| p.envelope).collect();
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let vendor = vendor_repo::find_by_id(&state.pool, &ctx.tenant_id, vendor_id)
                .await?
                .ok_or_else(|| DomainError::internal("vendor row missing after commit"))?;
            Ok(CommandResponse::created(vendor_json(&vendor)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn update_vendor(
    State(state): State<AppState>,
    Path((tenant_id, vendor_id)): Path<(String, Uuid)>,
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

            vendor_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, vendor_id)
                .await?
                .ok_or_else(|| DomainError::not_found("vendor not found"))?;
            let existing = vendor_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, vendor_id)
                .await?
                .ok_or_else(|| DomainError::not_found("vendor not found"))?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;

            let new_balance = round_money(
                request
                    .opening_balance
                    .unwrap_or(existing.opening_balance),
            );

            vendor_repo::update_tx(
                &mut tx,
                &ctx.tenant_id,
                vendor_id,
                request.name.trim(),
                request.email.as_deref(),
                request.phone.as_deref(),
                new_balance,
            )
            .await?;

            let posted = opening_balance::post_vendor_delta(
                &mut tx,
                &ctx,
                &company,
                vendor_id,
                existing.opening_balance,
                new_balance,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "vendor.update",
                "Vendor",
                &vendor_id.to_string(),
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

            let vendor = vendor_repo::find_by_id(&state.pool, &ctx.tenant_id, vendor_id)
                .await?
                .ok_or_else(|| DomainError::internal("vendor row missing after commit"))?;
            Ok(CommandResponse::ok(vendor_json(&vendor)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_vendor(
    State(state): State<AppState>,
    Path((tenant_id, vendor_id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let vendor = vendor_repo::find_by_id(&state.pool, &tenant_id, vendor_id)
        .await?
        .ok_or_else(|| DomainError::not_found("vendor not found"))?;

    Ok(Json(vendor_json(&vendor)))
}

async fn list_vendors(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let vendors = vendor_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = vendors.iter().map(vendor_json).collect();

    Ok(Json(json!(body)))
}
