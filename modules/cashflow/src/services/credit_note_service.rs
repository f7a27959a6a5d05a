//! Credit note lifecycle: draft CRUD, approval, posting with FIFO stock
//! returns, posted-edit adjustment, void, and refunds
//!
//! When a credit note is linked to a source invoice and a line returns
//! tracked goods, stock is restored at the exact costs the sale issued:
//! the original SALE_ISSUE moves are enumerated, quantities already
//! returned by earlier posted credit notes are subtracted per location, and
//! the new return is allocated FIFO across the remaining per-move capacity.

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
use crate::money::{line_subtotal, round_money};
use crate::repos::company_repo;
use crate::repos::credit_note_repo::{
    self, CreditNote, CreditNoteLine, CreditNoteLineInsert, CreditNoteStatus,
};
use crate::repos::invoice_repo;
use crate::repos::item_repo;
use crate::repos::journal_repo;
use crate::repos::sequence_repo::{self, DocType};
use crate::repos::stock_repo::{self, MoveDirection, MoveType, StockMove};
use crate::repos::{audit_repo, customer_repo};
use crate::services::account_provision;
use crate::services::inventory::{self, MoveRequest};
use crate::services::invoice_service::{recalc_requested_event, resolve_income_account};
use crate::services::ledger::{self, LedgerLine, NewJournalEntry};
use crate::services::payment_service::{
    journal_entry_created_event, journal_entry_reversed_event, validate_bank_account,
};
use crate::services::period_guard::ensure_period_open;
use crate::validation::{
    ensure_currency_matches, price_line, require_date, require_lines, sum_totals,
    CreditNoteRequest, RefundRequest, SalesLineRequest, VoidRequest,
};
use crate::AppState;

// ---------------------------------------------------------------------------
// FIFO return allocation (pure)
// ---------------------------------------------------------------------------

/// One slice of a return, applied against a single original issue move
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnAllocation {
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl ReturnAllocation {
    pub fn cost(&self) -> Decimal {
        round_money(self.quantity * self.unit_cost)
    }
}

/// Allocate a requested return quantity FIFO across the original issues
///
/// `already_returned` holds quantities previously returned per location;
/// they consume issue capacity oldest-first before the new request is
/// placed. Insufficient total capacity is an over-return.
pub fn allocate_returns(
    issues: &[StockMove],
    already_returned: &BTreeMap<Uuid, Decimal>,
    requested: Decimal,
) -> DomainResult<Vec<ReturnAllocation>> {
    let mut consumed = already_returned.clone();
    let mut remaining = requested;
    let mut allocations: Vec<ReturnAllocation> = Vec::new();

    for issue in issues {
        if remaining <= Decimal::ZERO {
            break;
        }

        let mut capacity = issue.quantity;
        if let Some(prior) = consumed.get_mut(&issue.location_id) {
            let eaten = capacity.min(*prior);
            capacity -= eaten;
            *prior -= eaten;
        }
        if capacity <= Decimal::ZERO {
            continue;
        }

        let take = capacity.min(remaining);
        remaining -= take;
        allocations.push(ReturnAllocation {
            location_id: issue.location_id,
            quantity: take,
            unit_cost: issue.unit_cost_applied,
        });
    }

    if remaining > Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "cannot return {requested}: only {} remaining against the original invoice",
            requested - remaining
        )));
    }

    Ok(allocations)
}

// ---------------------------------------------------------------------------
// JSON shape
// ---------------------------------------------------------------------------

pub fn credit_note_json(note: &CreditNote, lines: &[CreditNoteLine]) -> serde_json::Value {
    json!({
        "id": note.id,
        "customerId": note.customer_id,
        "invoiceId": note.invoice_id,
        "number": note.number,
        "status": note.status,
        "noteDate": note.note_date,
        "currency": note.currency,
        "locationId": note.location_id,
        "subtotal": note.subtotal,
        "discountAmount": note.discount_amount,
        "taxAmount": note.tax_amount,
        "total": note.total,
        "amountRefunded": note.amount_refunded,
        "journalEntryId": note.journal_entry_id,
        "lastAdjustmentJournalEntryId": note.last_adjustment_journal_entry_id,
        "voidJournalEntryId": note.void_journal_entry_id,
        "createdAt": note.created_at,
        "updatedAt": note.updated_at,
        "lines": lines.iter().map(|line| json!({
            "id": line.id,
            "lineNo": line.line_no,
            "itemId": line.item_id,
            "invoiceLineId": line.invoice_line_id,
            "description": line.description,
            "quantity": line.quantity,
            "unitPrice": line.unit_price,
            "discountAmount": line.discount_amount,
            "taxRate": line.tax_rate,
            "taxAmount": line.tax_amount,
            "incomeAccountId": line.income_account_id,
        })).collect::<Vec<_>>(),
    })
}

async fn load_note_response(
    state: &AppState,
    tenant_id: &str,
    note_id: Uuid,
) -> DomainResult<serde_json::Value> {
    let note = credit_note_repo::fetch(&state.pool, tenant_id, note_id)
        .await?
        .ok_or_else(|| DomainError::not_found("credit note not found"))?;
    let lines = credit_note_repo::fetch_lines(&state.pool, tenant_id, note_id).await?;
    Ok(credit_note_json(&note, &lines))
}

// ---------------------------------------------------------------------------
// Draft line building
// ---------------------------------------------------------------------------

struct BuiltLines {
    inserts: Vec<CreditNoteLineInsert>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
}

async fn build_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: &str,
    lines: &[SalesLineRequest],
) -> DomainResult<BuiltLines> {
    require_lines(lines)?;

    let mut inserts = Vec::with_capacity(lines.len());
    let mut priced = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        let item = item_repo::find_by_id_tx(tx, tenant_id, line.item_id)
            .await?
            .filter(|i| i.is_active)
            .ok_or_else(|| DomainError::not_found(format!("line {}: item not found", idx + 1)))?;

        let unit_price = line.unit_price.unwrap_or(item.unit_price);
        let computed = price_line(
            idx,
            line.quantity,
            unit_price,
            line.discount_amount.unwrap_or(Decimal::ZERO),
            line.tax_rate.unwrap_or(Decimal::ZERO),
        )?;

        inserts.push(CreditNoteLineInsert {
            item_id: item.id,
            invoice_line_id: line.invoice_line_id,
            description: line.description.clone(),
            quantity: computed.quantity,
            unit_price: computed.unit_amount,
            discount_amount: computed.discount_amount,
            tax_rate: computed.tax_rate,
            tax_amount: computed.tax_amount,
            income_account_id: line.income_account_id,
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

pub async fn create_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    request: CreditNoteRequest,
) -> DomainResult<CommandResponse> {
    let note_date = require_date(&request.note_date, "noteDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    customer_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.customer_id)
        .await?
        .ok_or_else(|| DomainError::not_found("customer not found"))?;

    if let Some(invoice_id) = request.invoice_id {
        let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
            .await?
            .ok_or_else(|| DomainError::not_found("invoice not found"))?;
        if !invoice.status.admits_credit_note() {
            return Err(DomainError::validation(
                "credit notes can only target posted invoices",
            ));
        }
    }

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    let note_id = Uuid::new_v4();
    let number = sequence_repo::next_tx(&mut tx, &ctx.tenant_id, DocType::CreditNote).await?;

    credit_note_repo::insert_tx(
        &mut tx,
        &ctx.tenant_id,
        note_id,
        request.customer_id,
        request.invoice_id,
        &number,
        note_date,
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
        "credit_note.create",
        "CreditNote",
        &note_id.to_string(),
        Some(json!({ "number": number, "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
    Ok(CommandResponse::created(body))
}

pub async fn update_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
    request: CreditNoteRequest,
) -> DomainResult<CommandResponse> {
    let note_date = require_date(&request.note_date, "noteDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
        .await?
        .ok_or_else(|| DomainError::not_found("credit note not found"))?;
    if !note.status.can_edit() {
        return Err(DomainError::validation(
            "only draft credit notes can be edited",
        ));
    }

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    customer_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.customer_id)
        .await?
        .ok_or_else(|| DomainError::not_found("customer not found"))?;

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    credit_note_repo::update_draft_tx(
        &mut tx,
        &ctx.tenant_id,
        note_id,
        request.customer_id,
        request.invoice_id,
        note_date,
        request.currency.as_deref(),
        request.location_id,
        built.subtotal,
        built.discount_amount,
        built.tax_amount,
        built.total,
    )
    .await?;
    credit_note_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, note_id, &built.inserts).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "credit_note.update",
        "CreditNote",
        &note_id.to_string(),
        Some(json!({ "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
    Ok(CommandResponse::ok(body))
}

pub async fn delete_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
) -> DomainResult<CommandResponse> {
    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
        .await?
        .ok_or_else(|| DomainError::not_found("credit note not found"))?;
    if !note.status.can_edit() {
        return Err(DomainError::validation(
            "only draft credit notes can be deleted",
        ));
    }

    credit_note_repo::delete_draft_tx(&mut tx, &ctx.tenant_id, note_id).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "credit_note.delete",
        "CreditNote",
        &note_id.to_string(),
        None,
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    Ok(CommandResponse::ok(json!({ "deleted": true, "id": note_id })))
}

pub async fn approve_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
) -> DomainResult<CommandResponse> {
    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
        .await?
        .ok_or_else(|| DomainError::not_found("credit note not found"))?;
    if !note.status.can_approve() {
        return Err(DomainError::validation(
            "only draft credit notes can be approved",
        ));
    }

    credit_note_repo::set_status_tx(&mut tx, &ctx.tenant_id, note_id, CreditNoteStatus::Approved)
        .await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "credit_note.approve",
        "CreditNote",
        &note_id.to_string(),
        None,
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
    Ok(CommandResponse::ok(body))
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

async fn post_lock_keys(state: &AppState, ctx: &WriteContext, note_id: Uuid) -> Vec<String> {
    let mut keys = vec![doc_lock_key("credit_note:post", &ctx.tenant_id, note_id)];

    let Ok(Some(note)) = credit_note_repo::fetch(&state.pool, &ctx.tenant_id, note_id).await else {
        return keys;
    };
    let Some(invoice_id) = note.invoice_id else {
        return keys;
    };
    let Ok(moves) = stock_repo::moves_for_reference(
        &state.pool,
        &ctx.tenant_id,
        types::AGG_INVOICE,
        invoice_id,
    )
    .await
    else {
        return keys;
    };

    for mv in &moves {
        keys.push(stock_lock_key(&ctx.tenant_id, mv.location_id, mv.item_id));
    }

    keys
}

pub async fn post_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
) -> DomainResult<CommandResponse> {
    let preview = credit_note_repo::fetch(&state.pool, &ctx.tenant_id, note_id)
        .await?
        .ok_or_else(|| DomainError::not_found("credit note not found"))?;
    ensure_period_open(&state.pool, &ctx.tenant_id, preview.note_date, "credit_note.post").await?;

    let keys = post_lock_keys(state, ctx, note_id).await;
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
                .await?
                .ok_or_else(|| DomainError::not_found("credit note not found"))?;
            if !note.status.can_post() {
                return Err(DomainError::validation(
                    "only draft or approved credit notes can be posted",
                ));
            }

            let lines = credit_note_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, note_id).await?;
            require_lines(&lines)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, note.currency.as_deref())?;
            let ar_account = account_provision::configured_ar_account(&mut tx, &company).await?;

            // Lock the source invoice so concurrent returns serialize
            if let Some(invoice_id) = note.invoice_id {
                let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("invoice not found"))?;
                if !invoice.status.admits_credit_note() {
                    return Err(DomainError::validation(
                        "credit notes can only target posted invoices",
                    ));
                }
            }

            // Re-price and bucket revenue by income account
            let mut priced = Vec::with_capacity(lines.len());
            let mut income_buckets: BTreeMap<Uuid, Decimal> = BTreeMap::new();
            let mut items = Vec::with_capacity(lines.len());

            for (idx, line) in lines.iter().enumerate() {
                let item = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, line.item_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::validation(format!("line {}: item not found", idx + 1))
                    })?;

                let computed = price_line(
                    idx,
                    line.quantity,
                    line.unit_price,
                    line.discount_amount,
                    line.tax_rate,
                )?;

                let income_account =
                    resolve_income_account(&mut tx, &ctx.tenant_id, line.income_account_id, &item)
                        .await?;
                *income_buckets.entry(income_account).or_default() += computed.subtotal;

                priced.push(computed);
                items.push(item);
            }

            let totals = sum_totals(&priced);
            if totals.total != note.total {
                return Err(DomainError::validation(format!(
                    "recomputed total {} does not match stored total {}",
                    totals.total, note.total
                )));
            }

            // Restock tracked lines linked back to the source invoice
            let mut total_return_cost = Decimal::ZERO;
            let mut move_ids = Vec::new();
            let mut recalc_moves: Vec<(Uuid, Uuid, NaiveDate)> = Vec::new();

            if let Some(invoice_id) = note.invoice_id {
                for (line, item) in lines.iter().zip(items.iter()) {
                    if !item.is_tracked() || line.invoice_line_id.is_none() {
                        continue;
                    }

                    let issues = stock_repo::sale_issues_for_reference_tx(
                        &mut tx,
                        &ctx.tenant_id,
                        item.id,
                        types::AGG_INVOICE,
                        invoice_id,
                    )
                    .await?;
                    let already_returned: BTreeMap<Uuid, Decimal> =
                        stock_repo::returned_quantities_for_invoice_tx(
                            &mut tx,
                            &ctx.tenant_id,
                            invoice_id,
                            item.id,
                        )
                        .await?
                        .into_iter()
                        .collect();

                    let allocations =
                        allocate_returns(&issues, &already_returned, line.quantity)?;

                    for allocation in &allocations {
                        let cost = allocation.cost();
                        let applied = inventory::apply(
                            &mut tx,
                            ctx,
                            &MoveRequest {
                                location_id: allocation.location_id,
                                item_id: item.id,
                                date: note.note_date,
                                move_type: MoveType::SaleReturn,
                                direction: MoveDirection::In,
                                quantity: allocation.quantity,
                                unit_cost: allocation.unit_cost,
                                total_cost_override: Some(cost),
                                reference_type: types::AGG_CREDIT_NOTE.to_string(),
                                reference_id: note_id,
                            },
                        )
                        .await?;

                        total_return_cost = round_money(total_return_cost + cost);
                        move_ids.push(applied.move_id);
                        if let Some(from) = applied.recalc_from {
                            recalc_moves.push((item.id, allocation.location_id, from));
                        }
                    }
                }
            }

            // Dr income buckets / Dr tax / Cr AR; restock adds Dr Inventory / Cr COGS
            let mut entry_lines = Vec::new();
            for (account_id, subtotal) in &income_buckets {
                entry_lines.push(LedgerLine::debit(*account_id, *subtotal));
            }
            if totals.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                entry_lines.push(LedgerLine::debit(tax_account.id, totals.tax_amount));
            }
            entry_lines.push(LedgerLine::credit(ar_account.id, totals.total));
            if total_return_cost > Decimal::ZERO {
                let inventory_account =
                    account_provision::configured_inventory_account(&mut tx, &company).await?;
                let cogs_account =
                    account_provision::configured_cogs_account(&mut tx, &company).await?;
                entry_lines.push(LedgerLine::debit(inventory_account.id, total_return_cost));
                entry_lines.push(LedgerLine::credit(cogs_account.id, total_return_cost));
            }

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    note.note_date,
                    format!("Credit note {}", note.number),
                    entry_lines,
                    &ctx.user_id,
                )
                .with_location(note.location_id)
                .skip_account_validation(),
            )
            .await?;

            stock_repo::link_journal_entry_tx(&mut tx, &ctx.tenant_id, &move_ids, entry_id).await?;

            credit_note_repo::mark_posted_tx(
                &mut tx,
                &ctx.tenant_id,
                note_id,
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
                "credit_note.post",
                "CreditNote",
                &note_id.to_string(),
                Some(json!({
                    "number": note.number,
                    "total": totals.total,
                    "journalEntryId": entry_id,
                })),
            )
            .await?;

            let mut envelopes = vec![
                journal_entry_created_event(ctx, entry_id, totals.total),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::CREDIT_NOTE_POSTED,
                    types::AGG_CREDIT_NOTE,
                    note_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "creditNoteId": note_id,
                        "number": note.number,
                        "customerId": note.customer_id,
                        "invoiceId": note.invoice_id,
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

            let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}

// ---------------------------------------------------------------------------
// Adjustment, void, refunds
// ---------------------------------------------------------------------------

pub async fn adjust_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
    request: CreditNoteRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("credit_note:adjust", &ctx.tenant_id, note_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
                .await?
                .ok_or_else(|| DomainError::not_found("credit note not found"))?;
            if note.status != CreditNoteStatus::Posted {
                return Err(DomainError::validation(
                    "only posted credit notes can be adjusted",
                ));
            }
            if note.amount_refunded > Decimal::ZERO {
                return Err(DomainError::validation(
                    "cannot adjust a credit note with recorded refunds",
                ));
            }

            let current_lines =
                credit_note_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, note_id).await?;
            for line in &current_lines {
                let item = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, line.item_id)
                    .await?
                    .ok_or_else(|| DomainError::validation("line item not found"))?;
                if item.is_tracked() && line.invoice_line_id.is_some() {
                    return Err(DomainError::validation(
                        "cannot adjust an inventory-tracked credit note (void and reissue instead)",
                    ));
                }
            }

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, request.currency.as_deref())?;
            let ar_account = account_provision::configured_ar_account(&mut tx, &company).await?;

            let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

            let mut income_buckets: BTreeMap<Uuid, Decimal> = BTreeMap::new();
            for insert in &built.inserts {
                let item = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, insert.item_id)
                    .await?
                    .ok_or_else(|| DomainError::validation("line item not found"))?;
                if item.is_tracked() && insert.invoice_line_id.is_some() {
                    return Err(DomainError::validation(
                        "cannot adjust a credit note onto inventory-tracked lines",
                    ));
                }
                let income_account = resolve_income_account(
                    &mut tx,
                    &ctx.tenant_id,
                    insert.income_account_id,
                    &item,
                )
                .await?;
                *income_buckets.entry(income_account).or_default() +=
                    line_subtotal(insert.quantity, insert.unit_price, insert.discount_amount);
            }

            let mut desired = Vec::new();
            for (account_id, subtotal) in &income_buckets {
                desired.push(LedgerLine::debit(*account_id, round_money(*subtotal)));
            }
            if built.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                desired.push(LedgerLine::debit(tax_account.id, built.tax_amount));
            }
            desired.push(LedgerLine::credit(ar_account.id, built.total));

            let posting_entry_id = note
                .journal_entry_id
                .ok_or_else(|| DomainError::internal("posted credit note has no journal entry"))?;
            let original_lines =
                journal_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, posting_entry_id)
                    .await?
                    .iter()
                    .map(|l| LedgerLine {
                        account_id: l.account_id,
                        debit: l.debit,
                        credit: l.credit,
                    })
                    .collect::<Vec<_>>();

            let mut envelopes = Vec::new();

            if let Some(previous_adjustment) = note.last_adjustment_journal_entry_id {
                let reversal_id = reverse_entry(
                    &mut tx,
                    ctx,
                    previous_adjustment,
                    &format!("Supersede adjustment for credit note {}", note.number),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, reversal_id, Decimal::ZERO));
                envelopes.push(journal_entry_reversed_event(
                    ctx,
                    previous_adjustment,
                    reversal_id,
                ));
            }

            let delta = ledger::adjustment_lines(&original_lines, &desired)?;
            let adjustment_entry_id = if delta.is_empty() {
                None
            } else {
                let entry_id = ledger::post_journal_entry(
                    &mut tx,
                    NewJournalEntry::new(
                        &ctx.tenant_id,
                        ctx.now.date_naive(),
                        format!("Adjustment for credit note {}", note.number),
                        delta,
                        &ctx.user_id,
                    )
                    .skip_account_validation(),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, entry_id, Decimal::ZERO));
                Some(entry_id)
            };

            credit_note_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, note_id, &built.inserts)
                .await?;
            credit_note_repo::mark_adjusted_tx(
                &mut tx,
                &ctx.tenant_id,
                note_id,
                built.subtotal,
                built.discount_amount,
                built.tax_amount,
                built.total,
                adjustment_entry_id,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "credit_note.adjust",
                "CreditNote",
                &note_id.to_string(),
                Some(json!({
                    "previousTotal": note.total,
                    "newTotal": built.total,
                    "adjustmentJournalEntryId": adjustment_entry_id,
                })),
            )
            .await?;

            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}

pub async fn void_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
    request: VoidRequest,
) -> DomainResult<CommandResponse> {
    let mut keys = vec![doc_lock_key("credit_note:void", &ctx.tenant_id, note_id)];
    if let Ok(moves) = stock_repo::moves_for_reference(
        &state.pool,
        &ctx.tenant_id,
        types::AGG_CREDIT_NOTE,
        note_id,
    )
    .await
    {
        for mv in &moves {
            keys.push(stock_lock_key(&ctx.tenant_id, mv.location_id, mv.item_id));
        }
    }

    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
                .await?
                .ok_or_else(|| DomainError::not_found("credit note not found"))?;
            if !note.status.can_void() {
                return Err(DomainError::validation(
                    "only posted credit notes can be voided",
                ));
            }
            if note.amount_refunded > Decimal::ZERO {
                return Err(DomainError::validation(
                    "cannot void a credit note with recorded refunds",
                ));
            }

            let posting_entry_id = note
                .journal_entry_id
                .ok_or_else(|| DomainError::internal("posted credit note has no journal entry"))?;

            let reason = request
                .reason
                .clone()
                .unwrap_or_else(|| format!("Void credit note {}", note.number));

            let mut envelopes = Vec::new();

            if let Some(adjustment_id) = note.last_adjustment_journal_entry_id {
                let reversal_id = reverse_entry(
                    &mut tx,
                    ctx,
                    adjustment_id,
                    &format!("Supersede adjustment for credit note {}", note.number),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, reversal_id, Decimal::ZERO));
                envelopes.push(journal_entry_reversed_event(ctx, adjustment_id, reversal_id));
            }

            let void_entry_id = reverse_entry(&mut tx, ctx, posting_entry_id, &reason).await?;

            // Undo the restock: issue back out at the exact return costs
            let moves = stock_repo::moves_for_reference_tx(
                &mut tx,
                &ctx.tenant_id,
                types::AGG_CREDIT_NOTE,
                note_id,
            )
            .await?;
            let mut reversal_move_ids = Vec::new();
            for mv in moves
                .iter()
                .filter(|m| m.move_type == MoveType::SaleReturn)
            {
                let applied = inventory::apply(
                    &mut tx,
                    ctx,
                    &MoveRequest {
                        location_id: mv.location_id,
                        item_id: mv.item_id,
                        date: ctx.now.date_naive(),
                        move_type: MoveType::Adjustment,
                        direction: MoveDirection::Out,
                        quantity: mv.quantity,
                        unit_cost: mv.unit_cost_applied,
                        total_cost_override: Some(mv.total_cost_applied),
                        reference_type: types::AGG_CREDIT_NOTE.to_string(),
                        reference_id: note_id,
                    },
                )
                .await?;
                reversal_move_ids.push(applied.move_id);
            }
            stock_repo::link_journal_entry_tx(
                &mut tx,
                &ctx.tenant_id,
                &reversal_move_ids,
                void_entry_id,
            )
            .await?;

            journal_repo::mark_voided_tx(
                &mut tx,
                &ctx.tenant_id,
                posting_entry_id,
                &reason,
                &ctx.user_id,
            )
            .await?;
            credit_note_repo::mark_voided_tx(&mut tx, &ctx.tenant_id, note_id, void_entry_id)
                .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "credit_note.void",
                "CreditNote",
                &note_id.to_string(),
                Some(json!({ "reason": reason, "voidJournalEntryId": void_entry_id })),
            )
            .await?;

            envelopes.push(journal_entry_created_event(ctx, void_entry_id, note.total));
            envelopes.push(journal_entry_reversed_event(ctx, posting_entry_id, void_entry_id));
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}

pub async fn refund_credit_note(
    state: &AppState,
    ctx: &WriteContext,
    note_id: Uuid,
    request: RefundRequest,
) -> DomainResult<CommandResponse> {
    let amount = round_money(request.amount);
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation("amount must be positive"));
    }
    let refund_date = require_date(&request.refund_date, "refundDate")?;
    ensure_period_open(&state.pool, &ctx.tenant_id, refund_date, "credit_note.refund").await?;

    let keys = vec![doc_lock_key("credit_note:refund", &ctx.tenant_id, note_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let note = credit_note_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, note_id)
                .await?
                .ok_or_else(|| DomainError::not_found("credit note not found"))?;
            if !note.status.can_refund() {
                return Err(DomainError::validation(
                    "only posted credit notes can be refunded",
                ));
            }

            let remaining = round_money(note.total - note.amount_refunded);
            if amount > remaining {
                return Err(DomainError::validation(format!(
                    "amount cannot exceed remaining credit of {remaining}"
                )));
            }

            let (banking, bank_account) =
                validate_bank_account(&mut tx, &ctx.tenant_id, request.bank_account_id, None)
                    .await?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            let ar_account = account_provision::configured_ar_account(&mut tx, &company).await?;

            // The posted note credited AR; paying the customer back restores it
            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    refund_date,
                    format!("Refund for credit note {}", note.number),
                    vec![
                        LedgerLine::debit(ar_account.id, amount),
                        LedgerLine::credit(bank_account.id, amount),
                    ],
                    &ctx.user_id,
                )
                .skip_account_validation(),
            )
            .await?;

            let refund_id = credit_note_repo::insert_refund_tx(
                &mut tx,
                &ctx.tenant_id,
                note_id,
                amount,
                refund_date,
                banking.id,
                entry_id,
                &ctx.user_id,
            )
            .await?;

            credit_note_repo::add_refunded_amount_tx(&mut tx, &ctx.tenant_id, note_id, amount)
                .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "credit_note.refund",
                "CreditNoteRefund",
                &refund_id.to_string(),
                Some(json!({ "creditNoteId": note_id, "amount": amount })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, amount),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::CREDIT_NOTE_REFUNDED,
                    types::AGG_CREDIT_NOTE,
                    note_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "creditNoteId": note_id,
                        "refundId": refund_id,
                        "amount": amount,
                        "journalEntryId": entry_id,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_note_response(state, &ctx.tenant_id, note_id).await?;
            Ok(CommandResponse::created(body))
        })
        .await
}

async fn reverse_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ctx: &WriteContext,
    original_entry_id: Uuid,
    reason: &str,
) -> DomainResult<Uuid> {
    ledger::reverse_entry(
        tx,
        &ctx.tenant_id,
        ctx.now.date_naive(),
        &ctx.user_id,
        original_entry_id,
        reason,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn issue(location: u128, qty: &str, unit_cost: &str) -> StockMove {
        StockMove {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            location_id: Uuid::from_u128(location),
            item_id: Uuid::from_u128(99),
            move_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            move_type: MoveType::SaleIssue,
            direction: MoveDirection::Out,
            quantity: dec(qty),
            unit_cost_applied: dec(unit_cost),
            total_cost_applied: round_money(dec(qty) * dec(unit_cost)),
            reference_type: "Invoice".into(),
            reference_id: Uuid::from_u128(7),
            correlation_id: Uuid::new_v4(),
            created_by: "u1".into(),
            journal_entry_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_allocation_spans_locations_fifo() {
        // Sold 6 from L1 @ 4.00 and 4 from L2 @ 5.00; 3 already returned
        // from L1. A 5-unit return takes 3 from L1 then 2 from L2.
        let issues = vec![issue(1, "6", "4.00"), issue(2, "4", "5.00")];
        let mut returned = BTreeMap::new();
        returned.insert(Uuid::from_u128(1), dec("3"));

        let allocations = allocate_returns(&issues, &returned, dec("5")).unwrap();
        assert_eq!(allocations.len(), 2);

        assert_eq!(allocations[0].location_id, Uuid::from_u128(1));
        assert_eq!(allocations[0].quantity, dec("3"));
        assert_eq!(allocations[0].unit_cost, dec("4.00"));

        assert_eq!(allocations[1].location_id, Uuid::from_u128(2));
        assert_eq!(allocations[1].quantity, dec("2"));
        assert_eq!(allocations[1].unit_cost, dec("5.00"));

        let total_cost: Decimal = allocations.iter().map(|a| a.cost()).sum();
        assert_eq!(round_money(total_cost), dec("22.00"));
    }

    #[test]
    fn test_allocation_rejects_over_return() {
        let issues = vec![issue(1, "6", "4.00")];
        let mut returned = BTreeMap::new();
        returned.insert(Uuid::from_u128(1), dec("3"));

        // Only 3 units of capacity remain
        assert!(allocate_returns(&issues, &returned, dec("4")).is_err());
        assert!(allocate_returns(&issues, &returned, dec("3")).is_ok());
    }

    #[test]
    fn test_allocation_exact_capacity() {
        let issues = vec![issue(1, "2", "3.50"), issue(1, "3", "4.00")];
        let allocations = allocate_returns(&issues, &BTreeMap::new(), dec("5")).unwrap();

        let total_qty: Decimal = allocations.iter().map(|a| a.quantity).sum();
        assert_eq!(total_qty, dec("5"));
        // FIFO: the cheap early units go first
        assert_eq!(allocations[0].unit_cost, dec("3.50"));
        assert_eq!(allocations[1].unit_cost, dec("4.00"));
    }

    #[test]
    fn test_allocation_zero_capacity_after_prior_returns() {
        let issues = vec![issue(1, "5", "4.00")];
        let mut returned = BTreeMap::new();
        returned.insert(Uuid::from_u128(1), dec("5"));

        assert!(allocate_returns(&issues, &returned, dec("1")).is_err());
    }
}
