//! Purchase bill lifecycle: draft CRUD and posting
//!
//! Posting books Dr Inventory (tracked goods, which also applies
//! PURCHASE_RECEIPT moves feeding the weighted average) or Dr expense
//! accounts (untracked lines), Dr Tax Payable, Cr AP. Payments live in
//! `payment_service`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use event_bus::EventEnvelope;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::events::{self, types};
use crate::idempotency::CommandResponse;
use crate::locks::{doc_lock_key, stock_lock_key, DEFAULT_LOCK_TTL};
use crate::money::round_money;
use crate::repos::account_repo::{self, AccountType};
use crate::repos::company_repo::{self, Company};
use crate::repos::item_repo::{self, Item};
use crate::repos::purchase_bill_repo::{
    self, PurchaseBill, PurchaseBillLine, PurchaseBillLineInsert,
};
use crate::repos::sequence_repo::{self, DocType};
use crate::repos::stock_repo::{self, MoveDirection, MoveType};
use crate::repos::{audit_repo, location_repo, vendor_repo};
use crate::services::account_provision;
use crate::services::inventory::{self, MoveRequest};
use crate::services::invoice_service::recalc_requested_event;
use crate::services::ledger::{self, LedgerLine, NewJournalEntry};
use crate::services::payment_service::journal_entry_created_event;
use crate::services::period_guard::ensure_period_open;
use crate::validation::{
    ensure_currency_matches, optional_date, price_line, require_date, require_lines, sum_totals,
    PurchaseBillRequest, PurchaseLineRequest,
};
use crate::AppState;

// ---------------------------------------------------------------------------
// JSON shape
// ---------------------------------------------------------------------------

pub fn purchase_bill_json(bill: &PurchaseBill, lines: &[PurchaseBillLine]) -> serde_json::Value {
    json!({
        "id": bill.id,
        "vendorId": bill.vendor_id,
        "number": bill.number,
        "status": bill.status,
        "billDate": bill.bill_date,
        "dueDate": bill.due_date,
        "currency": bill.currency,
        "locationId": bill.location_id,
        "subtotal": bill.subtotal,
        "discountAmount": bill.discount_amount,
        "taxAmount": bill.tax_amount,
        "total": bill.total,
        "amountPaid": bill.amount_paid,
        "journalEntryId": bill.journal_entry_id,
        "createdAt": bill.created_at,
        "updatedAt": bill.updated_at,
        "lines": lines.iter().map(|line| json!({
            "id": line.id,
            "lineNo": line.line_no,
            "itemId": line.item_id,
            "description": line.description,
            "quantity": line.quantity,
            "unitCost": line.unit_cost,
            "discountAmount": line.discount_amount,
            "taxRate": line.tax_rate,
            "taxAmount": line.tax_amount,
            "expenseAccountId": line.expense_account_id,
        })).collect::<Vec<_>>(),
    })
}

async fn load_bill_response(
    state: &AppState,
    tenant_id: &str,
    bill_id: Uuid,
) -> DomainResult<serde_json::Value> {
    let bill = purchase_bill_repo::fetch(&state.pool, tenant_id, bill_id)
        .await?
        .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;
    let lines = purchase_bill_repo::fetch_lines(&state.pool, tenant_id, bill_id).await?;
    Ok(purchase_bill_json(&bill, &lines))
}

// ---------------------------------------------------------------------------
// Draft line building
// ---------------------------------------------------------------------------

struct BuiltLines {
    inserts: Vec<PurchaseBillLineInsert>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
}

async fn build_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: &str,
    lines: &[PurchaseLineRequest],
) -> DomainResult<BuiltLines> {
    require_lines(lines)?;

    let mut inserts = Vec::with_capacity(lines.len());
    let mut priced = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        let item = item_repo::find_by_id_tx(tx, tenant_id, line.item_id)
            .await?
            .filter(|i| i.is_active)
            .ok_or_else(|| DomainError::not_found(format!("line {}: item not found", idx + 1)))?;

        let computed = price_line(
            idx,
            line.quantity,
            line.unit_cost,
            line.discount_amount.unwrap_or(Decimal::ZERO),
            line.tax_rate.unwrap_or(Decimal::ZERO),
        )?;

        inserts.push(PurchaseBillLineInsert {
            item_id: item.id,
            description: line.description.clone(),
            quantity: computed.quantity,
            unit_cost: computed.unit_amount,
            discount_amount: computed.discount_amount,
            tax_rate: computed.tax_rate,
            tax_amount: computed.tax_amount,
            expense_account_id: line.expense_account_id,
        });
        priced.push(computed);
    }

    let totals = sum_totals(&priced);
    Ok(BuiltLines {
        inserts,
        subtotal: totals.subtotal,
        discount_amount: totals.discount_amount,
        tax_amount: totals.tax_amount,
        total: totals.total,
    })
}

// ---------------------------------------------------------------------------
// Draft CRUD
// ---------------------------------------------------------------------------

pub async fn create_purchase_bill(
    state: &AppState,
    ctx: &WriteContext,
    request: PurchaseBillRequest,
) -> DomainResult<CommandResponse> {
    let bill_date = require_date(&request.bill_date, "billDate")?;
    let due_date = optional_date(request.due_date.as_deref(), "dueDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    vendor_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.vendor_id)
        .await?
        .ok_or_else(|| DomainError::not_found("vendor not found"))?;

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    let bill_id = Uuid::new_v4();
    let number = sequence_repo::next_tx(&mut tx, &ctx.tenant_id, DocType::PurchaseBill).await?;

    purchase_bill_repo::insert_tx(
        &mut tx,
        &ctx.tenant_id,
        bill_id,
        request.vendor_id,
        &number,
        bill_date,
        due_date,
        request.currency.as_deref(),
        request.location_id,
        built.subtotal,
        built.discount_amount,
        built.tax_amount,
        built.total,
        &ctx.user_id,
        &built.inserts,
    )
    .await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "bill.create",
        "PurchaseBill",
        &bill_id.to_string(),
        Some(json!({ "number": number, "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_bill_response(state, &ctx.tenant_id, bill_id).await?;
    Ok(CommandResponse::created(body))
}

pub async fn update_purchase_bill(
    state: &AppState,
    ctx: &WriteContext,
    bill_id: Uuid,
    request: PurchaseBillRequest,
) -> DomainResult<CommandResponse> {
    let bill_date = require_date(&request.bill_date, "billDate")?;
    let due_date = optional_date(request.due_date.as_deref(), "dueDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let bill = purchase_bill_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, bill_id)
        .await?
        .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;
    if !bill.status.can_edit() {
        return Err(DomainError::validation(
            "only draft purchase bills can be edited",
        ));
    }

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    vendor_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.vendor_id)
        .await?
        .ok_or_else(|| DomainError::not_found("vendor not found"))?;

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    purchase_bill_repo::update_draft_tx(
        &mut tx,
        &ctx.tenant_id,
        bill_id,
        request.vendor_id,
        bill_date,
        due_date,
        request.currency.as_deref(),
        request.location_id,
        built.subtotal,
        built.discount_amount,
        built.tax_amount,
        built.total,
    )
    .await?;
    purchase_bill_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, bill_id, &built.inserts).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "bill.update",
        "PurchaseBill",
        &bill_id.to_string(),
        Some(json!({ "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_bill_response(state, &ctx.tenant_id, bill_id).await?;
    Ok(CommandResponse::ok(body))
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

async fn resolve_location(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    company: &Company,
    bill_location: Option<Uuid>,
    item: &Item,
) -> DomainResult<Uuid> {
    if let Some(id) = bill_location.or(item.default_location_id).or(company.default_location_id) {
        return Ok(id);
    }

    let fallback = location_repo::find_default_tx(tx, &company.id).await?;
    fallback.map(|l| l.id).ok_or_else(|| {
        DomainError::validation(format!(
            "no stock location resolvable for item {}",
            item.name
        ))
    })
}

async fn post_lock_keys(state: &AppState, ctx: &WriteContext, bill_id: Uuid) -> Vec<String> {
    let mut keys = vec![doc_lock_key("bill:post", &ctx.tenant_id, bill_id)];

    let Ok(Some(bill)) = purchase_bill_repo::fetch(&state.pool, &ctx.tenant_id, bill_id).await
    else {
        return keys;
    };
    let Ok(lines) = purchase_bill_repo::fetch_lines(&state.pool, &ctx.tenant_id, bill_id).await
    else {
        return keys;
    };
    let Ok(Some(company)) = company_repo::fetch(&state.pool, &ctx.tenant_id).await else {
        return keys;
    };

    for line in &lines {
        let Ok(Some(item)) = item_repo::find_by_id(&state.pool, &ctx.tenant_id, line.item_id).await
        else {
            continue;
        };
        if !item.is_tracked() {
            continue;
        }
        if let Some(location) = bill
            .location_id
            .or(item.default_location_id)
            .or(company.default_location_id)
        {
            keys.push(stock_lock_key(&ctx.tenant_id, location, item.id));
        }
    }

    keys
}

pub async fn post_purchase_bill(
    state: &AppState,
    ctx: &WriteContext,
    bill_id: Uuid,
) -> DomainResult<CommandResponse> {
    let preview = purchase_bill_repo::fetch(&state.pool, &ctx.tenant_id, bill_id)
        .await?
        .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;
    ensure_period_open(&state.pool, &ctx.tenant_id, preview.bill_date, "bill.post").await?;

    let keys = post_lock_keys(state, ctx, bill_id).await;
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let bill = purchase_bill_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, bill_id)
                .await?
                .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;
            if !bill.status.can_post() {
                return Err(DomainError::validation(
                    "only draft purchase bills can be posted",
                ));
            }

            let lines = purchase_bill_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, bill_id).await?;
            require_lines(&lines)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, bill.currency.as_deref())?;
            let ap_account = account_provision::configured_ap_account(&mut tx, &company).await?;

            // Re-price stored lines; split into inventory and expense sides
            let mut priced = Vec::with_capacity(lines.len());
            let mut items = Vec::with_capacity(lines.len());
            let mut expense_buckets: BTreeMap<Uuid, Decimal> = BTreeMap::new();
            let mut inventory_total = Decimal::ZERO;

            for (idx, line) in lines.iter().enumerate() {
                let item = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, line.item_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::validation(format!("line {}: item not found", idx + 1))
                    })?;

                let computed = price_line(
                    idx,
                    line.quantity,
                    line.unit_cost,
                    line.discount_amount,
                    line.tax_rate,
                )?;

                if item.is_tracked() {
                    inventory_total = round_money(inventory_total + computed.subtotal);
                } else {
                    let account_id = line
                        .expense_account_id
                        .or(item.expense_account_id)
                        .ok_or_else(|| {
                            DomainError::validation(format!(
                                "line {}: no expense account resolvable",
                                idx + 1
                            ))
                        })?;
                    let account =
                        account_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, account_id)
                            .await?
                            .filter(|a| a.is_active && a.account_type == AccountType::Expense)
                            .ok_or_else(|| {
                                DomainError::validation(format!(
                                    "line {}: expense account not found or not EXPENSE",
                                    idx + 1
                                ))
                            })?;
                    *expense_buckets.entry(account.id).or_default() += computed.subtotal;
                }

                priced.push(computed);
                items.push(item);
            }

            let totals = sum_totals(&priced);
            if totals.total != bill.total {
                return Err(DomainError::validation(format!(
                    "recomputed total {} does not match stored total {}",
                    totals.total, bill.total
                )));
            }

            // Receive tracked goods; purchase receipts feed the average cost
            let mut move_ids = Vec::new();
            let mut recalc_moves: Vec<(Uuid, Uuid, NaiveDate)> = Vec::new();

            for (idx, item) in items.iter().enumerate() {
                if !item.is_tracked() {
                    continue;
                }
                let line = &lines[idx];
                let location = resolve_location(&mut tx, &company, bill.location_id, item).await?;

                // The received unit cost is the discounted line cost
                let effective_unit_cost = if line.quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    round_money(priced[idx].subtotal / line.quantity)
                };

                let applied = inventory::apply(
                    &mut tx,
                    ctx,
                    &MoveRequest {
                        location_id: location,
                        item_id: item.id,
                        date: bill.bill_date,
                        move_type: MoveType::PurchaseReceipt,
                        direction: MoveDirection::In,
                        quantity: line.quantity,
                        unit_cost: effective_unit_cost,
                        total_cost_override: Some(priced[idx].subtotal),
                        reference_type: types::AGG_PURCHASE_BILL.to_string(),
                        reference_id: bill_id,
                    },
                )
                .await?;

                move_ids.push(applied.move_id);
                if let Some(from) = applied.recalc_from {
                    recalc_moves.push((item.id, location, from));
                }
            }

            let mut entry_lines = Vec::new();
            if inventory_total > Decimal::ZERO {
                let inventory_account =
                    account_provision::configured_inventory_account(&mut tx, &company).await?;
                entry_lines.push(LedgerLine::debit(inventory_account.id, inventory_total));
            }
            for (account_id, subtotal) in &expense_buckets {
                entry_lines.push(LedgerLine::debit(*account_id, round_money(*subtotal)));
            }
            if totals.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                entry_lines.push(LedgerLine::debit(tax_account.id, totals.tax_amount));
            }
            entry_lines.push(LedgerLine::credit(ap_account.id, totals.total));

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    bill.bill_date,
                    format!("Purchase bill {}", bill.number),
                    entry_lines,
                    &ctx.user_id,
                )
                .with_location(bill.location_id)
                .skip_account_validation(),
            )
            .await?;

            stock_repo::link_journal_entry_tx(&mut tx, &ctx.tenant_id, &move_ids, entry_id).await?;

            purchase_bill_repo::mark_posted_tx(
                &mut tx,
                &ctx.tenant_id,
                bill_id,
                totals.subtotal,
                totals.discount_amount,
                totals.tax_amount,
                totals.total,
                entry_id,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "bill.post",
                "PurchaseBill",
                &bill_id.to_string(),
                Some(json!({
                    "number": bill.number,
                    "total": totals.total,
                    "journalEntryId": entry_id,
                })),
            )
            .await?;

            let mut envelopes = vec![
                journal_entry_created_event(ctx, entry_id, totals.total),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::BILL_POSTED,
                    types::AGG_PURCHASE_BILL,
                    bill_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "purchaseBillId": bill_id,
                        "number": bill.number,
                        "vendorId": bill.vendor_id,
                        "total": totals.total,
                        "journalEntryId": entry_id,
                    }),
                ),
            ];
            for (item_id, location_id, from) in &recalc_moves {
                envelopes.push(recalc_requested_event(ctx, *item_id, *location_id, *from));
            }
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_bill_response(state, &ctx.tenant_id, bill_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}
