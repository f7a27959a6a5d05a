//! Tenant provisioning and settings
//!
//! `POST /companies` creates the tenant row, seeds the canonical chart of
//! accounts, creates a default location, and wires the distinguished
//! accounts. Settings exposes the same wiring for later edits. Locations
//! and banking accounts live here too; both are prerequisites for posting
//! flows rather than documents in their own right.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::idempotency::{self, CommandResponse};
use crate::repos::banking_repo::{self, BankingKind};
use crate::repos::company_repo::{self, Company};
use crate::repos::{account_repo, audit_repo, location_repo};
use crate::services::account_provision;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/companies", post(create_company))
        .route(
            "/companies/{tenant_id}/settings",
            get(get_settings).put(update_settings),
        )
        .route(
            "/companies/{tenant_id}/locations",
            post(create_location).get(list_locations),
        )
        .route(
            "/companies/{tenant_id}/banking-accounts",
            post(create_banking_account),
        )
        .route("/companies/{tenant_id}/accounts", get(list_accounts))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCompanyRequest {
    id: String,
    name: String,
    base_currency: Option<String>,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    base_currency: Option<String>,
    time_zone: Option<String>,
    ar_account_id: Option<Uuid>,
    ap_account_id: Option<Uuid>,
    opening_balance_equity_account_id: Option<Uuid>,
    inventory_asset_account_id: Option<Uuid>,
    cogs_account_id: Option<Uuid>,
    default_location_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationRequest {
    name: String,
    is_default: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankingAccountRequest {
    name: String,
    account_id: Uuid,
    kind: Option<String>,
}

fn company_json(company: &Company) -> serde_json::Value {
    json!({
        "id": company.id,
        "name": company.name,
        "baseCurrency": company.base_currency,
        "timeZone": company.time_zone,
        "arAccountId": company.ar_account_id,
        "apAccountId": company.ap_account_id,
        "openingBalanceEquityAccountId": company.opening_balance_equity_account_id,
        "inventoryAssetAccountId": company.inventory_asset_account_id,
        "cogsAccountId": company.cogs_account_id,
        "defaultLocationId": company.default_location_id,
        "createdAt": company.created_at,
        "updatedAt": company.updated_at,
    })
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &serde_json::Value) -> DomainResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| DomainError::validation(format!("invalid request body: {e}")))
}

fn validate_currency(code: Option<&str>) -> DomainResult<Option<String>> {
    match code {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim().to_ascii_uppercase();
            if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(DomainError::validation(
                    "baseCurrency must be a 3-letter code",
                ));
            }
            Ok(Some(trimmed))
        }
    }
}

/// Provision a new tenant: company row, canonical chart, default location
async fn create_company(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: CreateCompanyRequest = parse_body(&body)?;
    if request.id.trim().is_empty() || request.name.trim().is_empty() {
        return Err(DomainError::validation("id and name are required"));
    }
    let tenant_id = request.id.trim().to_string();
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || async {
            let base_currency = validate_currency(request.base_currency.as_deref())?;
            let time_zone = request.time_zone.clone().unwrap_or_else(|| "+00:00".to_string());

            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            if company_repo::fetch_tx(&mut tx, &ctx.tenant_id).await?.is_some() {
                return Err(DomainError::conflict("company already exists"));
            }

            company_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                request.name.trim(),
                base_currency.as_deref(),
                &time_zone,
            )
            .await?;

            let chart = account_provision::provision_chart(&mut tx, &ctx.tenant_id).await?;

            let location_id = Uuid::new_v4();
            location_repo::insert_tx(&mut tx, &ctx.tenant_id, location_id, "Main", true).await?;

            company_repo::update_settings_tx(
                &mut tx,
                &ctx.tenant_id,
                base_currency.as_deref(),
                &time_zone,
                Some(chart.accounts_receivable.id),
                Some(chart.accounts_payable.id),
                Some(chart.opening_balance_equity.id),
                Some(chart.inventory_asset.id),
                Some(chart.cogs.id),
                Some(location_id),
            )
            .await?;

            // The seeded bank ledger account doubles as the first banking account
            banking_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                Uuid::new_v4(),
                "Primary Bank",
                chart.bank.id,
                BankingKind::Bank,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "company.create",
                "Company",
                &ctx.tenant_id,
                None,
            )
            .await?;

            tx.commit().await.map_err(DomainError::from)?;

            let company = company_repo::fetch(&state.pool, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::internal("company row missing after commit"))?;
            Ok(CommandResponse::created(company_json(&company)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn get_settings(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let company = company_repo::fetch(&state.pool, &tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;

    Ok(Json(company_json(&company)))
}

async fn update_settings(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: SettingsRequest = parse_body(&body)?;
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;

            let base_currency = match request.base_currency.as_deref() {
                Some(code) => validate_currency(Some(code))?,
                None => company.base_currency.clone(),
            };
            let time_zone = request
                .time_zone
                .clone()
                .unwrap_or_else(|| company.time_zone.clone());

            // Referenced accounts and locations must exist within the tenant
            for account_id in [
                request.ar_account_id,
                request.ap_account_id,
                request.opening_balance_equity_account_id,
                request.inventory_asset_account_id,
                request.cogs_account_id,
            ]
            .into_iter()
            .flatten()
            {
                account_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, account_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("account not found"))?;
            }
            if let Some(location_id) = request.default_location_id {
                location_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, location_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("location not found"))?;
            }

            company_repo::update_settings_tx(
                &mut tx,
                &ctx.tenant_id,
                base_currency.as_deref(),
                &time_zone,
                request.ar_account_id.or(company.ar_account_id),
                request.ap_account_id.or(company.ap_account_id),
                request
                    .opening_balance_equity_account_id
                    .or(company.opening_balance_equity_account_id),
                request
                    .inventory_asset_account_id
                    .or(company.inventory_asset_account_id),
                request.cogs_account_id.or(company.cogs_account_id),
                request.default_location_id.or(company.default_location_id),
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "company.settings.update",
                "Company",
                &ctx.tenant_id,
                None,
            )
            .await?;

            tx.commit().await.map_err(DomainError::from)?;

            let company = company_repo::fetch(&state.pool, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::internal("company row missing after commit"))?;
            Ok(CommandResponse::ok(company_json(&company)))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn create_location(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: LocationRequest = parse_body(&body)?;
    if request.name.trim().is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || async {
            let location_id = Uuid::new_v4();
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            location_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                location_id,
                request.name.trim(),
                request.is_default.unwrap_or(false),
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "location.create",
                "Location",
                &location_id.to_string(),
                None,
            )
            .await?;

            tx.commit().await.map_err(DomainError::from)?;

            Ok(CommandResponse::created(json!({
                "id": location_id,
                "name": request.name.trim(),
                "isDefault": request.is_default.unwrap_or(false),
            })))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn list_locations(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let locations = location_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = locations
        .iter()
        .map(|l| {
            json!({
                "id": l.id,
                "name": l.name,
                "isDefault": l.is_default,
                "createdAt": l.created_at,
            })
        })
        .collect();

    Ok(Json(json!(body)))
}

async fn create_banking_account(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, DomainError> {
    user.require_write()?;
    let key = idempotency::require_key(&headers)?;
    let request: BankingAccountRequest = parse_body(&body)?;
    if request.name.trim().is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    let ctx = WriteContext::new(&tenant_id, &user.user_id, &key);

    let outcome = idempotency::run(
        &state.pool,
        &tenant_id,
        &key,
        &idempotency::fingerprint(&body),
        || async {
            let kind = match request.kind.as_deref().map(str::to_ascii_uppercase).as_deref() {
                None | Some("BANK") => BankingKind::Bank,
                Some("CASH") => BankingKind::Cash,
                Some("CREDIT_CARD") => BankingKind::CreditCard,
                Some(other) => {
                    return Err(DomainError::validation(format!(
                        "kind must be BANK, CASH, or CREDIT_CARD, got {other}"
                    )))
                }
            };

            let banking_id = Uuid::new_v4();
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            account_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.account_id)
                .await?
                .ok_or_else(|| DomainError::not_found("ledger account not found"))?;

            banking_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                banking_id,
                request.name.trim(),
                request.account_id,
                kind,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                &ctx,
                "banking_account.create",
                "BankingAccount",
                &banking_id.to_string(),
                None,
            )
            .await?;

            tx.commit().await.map_err(DomainError::from)?;

            Ok(CommandResponse::created(json!({
                "id": banking_id,
                "name": request.name.trim(),
                "accountId": request.account_id,
                "kind": kind,
            })))
        },
    )
    .await?;

    Ok(outcome.response.into_response())
}

async fn list_accounts(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, DomainError> {
    let accounts = account_repo::list(&state.pool, &tenant_id).await?;
    let body: Vec<_> = accounts
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "code": a.code,
                "name": a.name,
                "accountType": a.account_type,
                "normalBalance": a.normal_balance,
                "reportGroup": a.report_group,
                "cashflowActivity": a.cashflow_activity,
                "isActive": a.is_active,
            })
        })
        .collect();

    Ok(Json(json!(body)))
}
