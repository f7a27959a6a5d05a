//! Item CRUD

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
use crate::idempotency::{self, CommandResponse};
use crate::money::round_money;
use crate::repos::item_repo::{self, Item, ItemType};
use crate::repos::{audit_repo, location_repo};
use crate::AppState;
use crate::validation::ItemRequest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/companies/{tenant_id}/items",
            post(create_item).get(list_items),
        )
        .route(
            "/companies/{tenant_id}/items/{id}",
            get(get_item).put(update_item),
        )
}

fn item_json(item: &Item) -> serde_json::Value {
    json!({
        "id": item.id,
        "name": item.name,
        "sku": item.sku,
        "itemType": item.item_type,
        "trackInventory": item.track_inventory,
        "unitPrice": item.unit_price,
        "unitCost": item.unit_cost,
        "incomeAccountId": item.income_account_id,
        "expenseAccountId": item.expense_account_id,
        "defaultLocationId": item.default_location_id,
        "isActive": item.is_active,
        "createdAt": item.created_at,
        "updatedAt": item.updated_at,
    })
}

fn parse_request(body: &serde_json::Value) -> DomainResult<ItemRequest> {
    let request: ItemRequest = serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))?;
    if request.name.trim().is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    Ok(request)
}

fn parse_item_type(raw: Option<&str>) -> DomainResult<ItemType> {
    match raw.map(str::to_ascii_uppercase).as_deref() {
        None | Some("SERVICE") => Ok(ItemType::Service),
        Some("GOODS") => Ok(ItemType::Goods),
        Some(other) => Err(DomainError::validation(format!(
            "itemType must be SERVICE or GOODS, got {other}"
        ))),
    }
}

async fn create_item(
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
            let item_type = parse_item_type(request.item_type.as_deref())?;
            let track_inventory = request.track_inventory.unwrap_or(false);
            if track_inventory && item_type != ItemType::Goods {
                return Err(DomainError::validation(
                    "only GOODS items can track inventory",
                ));
            }

            let item_id = Uuid::new_v4();
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            if let Some(location_id) = request.default_location_id {
                location_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, location_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("default location not found"))?;
            }

            item_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                item_id,
                request.name.trim(),
                request.sku.as_deref(),
                item_type,
                track_inventory,
                round_money(request.unit_price.unwrap_or(Decimal::ZERO)),
                round_money(request.unit_cost.unwrap_or(Decimal::ZERO)),
                request.income_account_id,
                request.expense_account_id,
                request.default_location_id,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "item.create",
                "Item",
                &item_id.to_string(),
                None,
            )
            .await?;

            tx.commit().await.map_err(DomainError::from)?;

            let item = item_repo::find_by_id(&state.pool, &ctx.tenant_id, item_id)
                .await?
                .ok_or_else(|| DomainError::internal("item row missing after commit"))?;
            Ok(CommandResponse::created(item_json(&item)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn update_item(
    State(state): State<AppState>,
    Path((tenant_id, item_id)): Path<(String, Uuid)>,
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

            let existing = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, item_id)
                .await?
                .ok_or_else(|| DomainError::not_found("item not found"))?;

            if let Some(location_id) = request.default_location_id {
                location_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, location_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("default location not found"))?;
            }

            item_repo::update_tx(
                &mut tx,
                &ctx.tenant_id,
                item_id,
                request.name.trim(),
                request.sku.as_deref(),
                round_money(request.unit_price.unwrap_or(existing.unit_price)),
                round_money(request.unit_cost.unwrap_or(existing.unit_cost)),
                request.income_account_id.or(existing.income_account_id),
                request.expense_account_id.or(existing.expense_account_id),
                request.default_location_id.or(existing.default_location_id),
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "item.update",
                "Item",
                &item_id.to_string(),
                None,
            )
            .await?;

            tx.commit().await.map_err(DomainError::from)?;

            let item = item_repo::find_by_id(&state.pool, &ctx.tenant_id, item_id)
                .await?
                .ok_or_else(|| DomainError::internal("item row missing after commit"))?;
            Ok(CommandResponse::ok(item_json(&item)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_item(
    State(state): State<AppState>,
    Path((tenant_id, item_id)): Path<(String, Uuid)>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let item = item_repo::find_by_id(&state.pool, &tenant_id, item_id)
        .await?
        .ok_or_else(|| DomainError::not_found("item not found"))?;

    Ok(Json(item_json(&item)))
}

async fn list_items(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let items = item_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = items.iter().map(item_json).collect();

    Ok(Json(json!(body)))
}
