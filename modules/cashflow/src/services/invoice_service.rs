//! Invoice lifecycle: draft CRUD, approval, posting, posted-edit
//! adjustment, void, and the JSON shape the API returns
//!
//! Posting is the heavy path: it re-prices the stored lines, groups revenue
//! by income account, issues stock for tracked goods at the running average
//! cost, and emits one balanced journal entry:
//! Dr AR / Cr income buckets / Cr Tax Payable / Dr COGS + Cr Inventory.

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
use crate::repos::invoice_repo::{self, Invoice, InvoiceLine, InvoiceLineInsert, InvoiceStatus};
use crate::repos::item_repo::{self, Item};
use crate::repos::journal_repo;
use crate::repos::payment_repo::{self, PaymentDocKind};
use crate::repos::sequence_repo::{self, DocType};
use crate::repos::stock_repo::{self, MoveDirection, MoveType};
use crate::repos::{audit_repo, customer_repo, location_repo};
use crate::services::account_provision;
use crate::services::inventory::{self, MoveRequest};
use crate::services::ledger::{self, LedgerLine, NewJournalEntry};
use crate::services::payment_service::{journal_entry_created_event, journal_entry_reversed_event};
use crate::services::period_guard::ensure_period_open;
use crate::validation::{
    ensure_currency_matches, optional_date, price_line, require_date, require_lines, sum_totals,
    today_in_time_zone, InvoiceRequest, SalesLineRequest, VoidRequest,
};
use crate::AppState;

// ---------------------------------------------------------------------------
// JSON shape
// ---------------------------------------------------------------------------

pub fn invoice_json(invoice: &Invoice, lines: &[InvoiceLine]) -> serde_json::Value {
    json!({
        "id": invoice.id,
        "customerId": invoice.customer_id,
        "number": invoice.number,
        "status": invoice.status,
        "invoiceDate": invoice.invoice_date,
        "dueDate": invoice.due_date,
        "currency": invoice.currency,
        "locationId": invoice.location_id,
        "subtotal": invoice.subtotal,
        "discountAmount": invoice.discount_amount,
        "taxAmount": invoice.tax_amount,
        "total": invoice.total,
        "amountPaid": invoice.amount_paid,
        "journalEntryId": invoice.journal_entry_id,
        "lastAdjustmentJournalEntryId": invoice.last_adjustment_journal_entry_id,
        "voidJournalEntryId": invoice.void_journal_entry_id,
        "createdAt": invoice.created_at,
        "updatedAt": invoice.updated_at,
        "lines": lines.iter().map(|line| json!({
            "id": line.id,
            "lineNo": line.line_no,
            "itemId": line.item_id,
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

async fn load_invoice_response(
    state: &AppState,
    tenant_id: &str,
    invoice_id: Uuid,
) -> DomainResult<serde_json::Value> {
    let invoice = invoice_repo::fetch(&state.pool, tenant_id, invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found("invoice not found"))?;
    let lines = invoice_repo::fetch_lines(&state.pool, tenant_id, invoice_id).await?;
    Ok(invoice_json(&invoice, &lines))
}

// ---------------------------------------------------------------------------
// Draft line building
// ---------------------------------------------------------------------------

struct BuiltLines {
    inserts: Vec<InvoiceLineInsert>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
}

/// Validate and price request lines, defaulting the unit price from the item
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
            .ok_or_else(|| {
                DomainError::not_found(format!("line {}: item not found", idx + 1))
            })?;

        let unit_price = line.unit_price.unwrap_or(item.unit_price);
        let computed = price_line(
            idx,
            line.quantity,
            unit_price,
            line.discount_amount.unwrap_or(Decimal::ZERO),
            line.tax_rate.unwrap_or(Decimal::ZERO),
        )?;

        inserts.push(InvoiceLineInsert {
            item_id: item.id,
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

pub async fn create_invoice(
    state: &AppState,
    ctx: &WriteContext,
    request: InvoiceRequest,
) -> DomainResult<CommandResponse> {
    let invoice_date = require_date(&request.invoice_date, "invoiceDate")?;
    let due_date = optional_date(request.due_date.as_deref(), "dueDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    customer_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.customer_id)
        .await?
        .ok_or_else(|| DomainError::not_found("customer not found"))?;

    if let Some(location_id) = request.location_id {
        location_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, location_id)
            .await?
            .ok_or_else(|| DomainError::not_found("location not found"))?;
    }

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    let invoice_id = Uuid::new_v4();
    let number = sequence_repo::next_tx(&mut tx, &ctx.tenant_id, DocType::Invoice).await?;

    invoice_repo::insert_tx(
        &mut tx,
        &ctx.tenant_id,
        invoice_id,
        request.customer_id,
        &number,
        invoice_date,
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
        "invoice.create",
        "Invoice",
        &invoice_id.to_string(),
        Some(json!({ "number": number, "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_invoice_response(state, &ctx.tenant_id, invoice_id).await?;
    Ok(CommandResponse::created(body))
}

pub async fn update_invoice(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
    request: InvoiceRequest,
) -> DomainResult<CommandResponse> {
    let invoice_date = require_date(&request.invoice_date, "invoiceDate")?;
    let due_date = optional_date(request.due_date.as_deref(), "dueDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found("invoice not found"))?;
    if !invoice.status.can_edit() {
        return Err(DomainError::validation("only draft invoices can be edited"));
    }

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    customer_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, request.customer_id)
        .await?
        .ok_or_else(|| DomainError::not_found("customer not found"))?;

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    invoice_repo::update_draft_tx(
        &mut tx,
        &ctx.tenant_id,
        invoice_id,
        request.customer_id,
        invoice_date,
        due_date,
        request.currency.as_deref(),
        request.location_id,
        built.subtotal,
        built.discount_amount,
        built.tax_amount,
        built.total,
    )
    .await?;
    invoice_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, invoice_id, &built.inserts).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "invoice.update",
        "Invoice",
        &invoice_id.to_string(),
        Some(json!({ "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_invoice_response(state, &ctx.tenant_id, invoice_id).await?;
    Ok(CommandResponse::ok(body))
}

pub async fn delete_invoice(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
) -> DomainResult<CommandResponse> {
    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found("invoice not found"))?;
    if !invoice.status.can_edit() {
        return Err(DomainError::validation(
            "only draft invoices can be deleted",
        ));
    }

    invoice_repo::delete_draft_tx(&mut tx, &ctx.tenant_id, invoice_id).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "invoice.delete",
        "Invoice",
        &invoice_id.to_string(),
        None,
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    Ok(CommandResponse::ok(json!({ "deleted": true, "id": invoice_id })))
}

pub async fn approve_invoice(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
) -> DomainResult<CommandResponse> {
    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found("invoice not found"))?;
    if !invoice.status.can_approve() {
        return Err(DomainError::validation(
            "only draft invoices can be approved",
        ));
    }

    invoice_repo::set_status_tx(&mut tx, &ctx.tenant_id, invoice_id, InvoiceStatus::Approved)
        .await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "invoice.approve",
        "Invoice",
        &invoice_id.to_string(),
        None,
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_invoice_response(state, &ctx.tenant_id, invoice_id).await?;
    Ok(CommandResponse::ok(body))
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

/// Resolve the stock location for a tracked line:
/// invoice location → item default → company default → flagged default row
async fn resolve_location(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    company: &Company,
    invoice_location: Option<Uuid>,
    item: &Item,
) -> DomainResult<Uuid> {
    if let Some(id) = invoice_location.or(item.default_location_id).or(company.default_location_id)
    {
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

/// Resolve the revenue account for a line:
/// line override → item mapping → default Sales Income (code 4000)
pub(crate) async fn resolve_income_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: &str,
    line_account: Option<Uuid>,
    item: &Item,
) -> DomainResult<Uuid> {
    let explicit = line_account.or(item.income_account_id);

    if let Some(account_id) = explicit {
        let account = account_repo::find_by_id_tx(tx, tenant_id, account_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| {
                DomainError::validation("line income account not found or inactive")
            })?;
        if account.account_type != AccountType::Income {
            return Err(DomainError::validation(
                "line income account must be of type INCOME",
            ));
        }
        return Ok(account.id);
    }

    let default = account_provision::sales_income_account(tx, tenant_id).await?;
    Ok(default.id)
}

/// Lock keys for posting: the document key plus one stock key per tracked
/// line. Resolution failures here only drop the advisory key; the
/// transaction re-resolves authoritatively and fails loudly.
async fn post_lock_keys(state: &AppState, ctx: &WriteContext, invoice_id: Uuid) -> Vec<String> {
    let mut keys = vec![doc_lock_key("invoice:post", &ctx.tenant_id, invoice_id)];

    let Ok(Some(invoice)) = invoice_repo::fetch(&state.pool, &ctx.tenant_id, invoice_id).await
    else {
        return keys;
    };
    let Ok(lines) = invoice_repo::fetch_lines(&state.pool, &ctx.tenant_id, invoice_id).await else {
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
        if let Some(location) = invoice
            .location_id
            .or(item.default_location_id)
            .or(company.default_location_id)
        {
            keys.push(stock_lock_key(&ctx.tenant_id, location, item.id));
        }
    }

    keys
}

pub async fn post_invoice(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
) -> DomainResult<CommandResponse> {
    // Period guard runs against the document date before any lock is taken
    let preview = invoice_repo::fetch(&state.pool, &ctx.tenant_id, invoice_id)
        .await?
        .ok_or_else(|| DomainError::not_found("invoice not found"))?;
    ensure_period_open(&state.pool, &ctx.tenant_id, preview.invoice_date, "invoice.post").await?;

    let keys = post_lock_keys(state, ctx, invoice_id).await;
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
                .await?
                .ok_or_else(|| DomainError::not_found("invoice not found"))?;
            if !invoice.status.can_post() {
                return Err(DomainError::validation(
                    "only draft or approved invoices can be posted",
                ));
            }

            let lines = invoice_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, invoice_id).await?;
            require_lines(&lines)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, invoice.currency.as_deref())?;
            let ar_account = account_provision::configured_ar_account(&mut tx, &company).await?;

            // Re-price the stored lines; the stored totals must reproduce
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
            if totals.total != invoice.total {
                return Err(DomainError::validation(format!(
                    "recomputed total {} does not match stored total {}",
                    totals.total, invoice.total
                )));
            }

            // Inventory: issue tracked goods at the running average cost
            let tracked: Vec<(usize, &Item)> = items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.is_tracked())
                .collect();

            if !tracked.is_empty() {
                let today = today_in_time_zone(ctx.now, &company.time_zone);
                if invoice.invoice_date > today {
                    return Err(DomainError::validation(
                        "invoice date is in the future; inventory cannot be issued",
                    ));
                }
            }

            let mut total_cogs = Decimal::ZERO;
            let mut move_ids = Vec::new();
            let mut recalc_moves: Vec<(Uuid, Uuid, NaiveDate)> = Vec::new();

            for (idx, item) in &tracked {
                let line = &lines[*idx];
                let location =
                    resolve_location(&mut tx, &company, invoice.location_id, item).await?;

                let applied = inventory::apply(
                    &mut tx,
                    ctx,
                    &MoveRequest {
                        location_id: location,
                        item_id: item.id,
                        date: invoice.invoice_date,
                        move_type: MoveType::SaleIssue,
                        direction: MoveDirection::Out,
                        quantity: line.quantity,
                        unit_cost: Decimal::ZERO,
                        total_cost_override: None,
                        reference_type: types::AGG_INVOICE.to_string(),
                        reference_id: invoice_id,
                    },
                )
                .await?;

                total_cogs = round_money(total_cogs + applied.total_cost_applied);
                move_ids.push(applied.move_id);
                if let Some(from) = applied.recalc_from {
                    recalc_moves.push((item.id, location, from));
                }
            }

            // Build the posting entry
            let mut entry_lines = vec![LedgerLine::debit(ar_account.id, totals.total)];
            for (account_id, subtotal) in &income_buckets {
                entry_lines.push(LedgerLine::credit(*account_id, *subtotal));
            }
            if totals.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                entry_lines.push(LedgerLine::credit(tax_account.id, totals.tax_amount));
            }
            if total_cogs > Decimal::ZERO {
                let cogs_account =
                    account_provision::configured_cogs_account(&mut tx, &company).await?;
                let inventory_account =
                    account_provision::configured_inventory_account(&mut tx, &company).await?;
                entry_lines.push(LedgerLine::debit(cogs_account.id, total_cogs));
                entry_lines.push(LedgerLine::credit(inventory_account.id, total_cogs));
            }

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    invoice.invoice_date,
                    format!("Invoice {}", invoice.number),
                    entry_lines,
                    &ctx.user_id,
                )
                .with_location(invoice.location_id)
                .skip_account_validation(),
            )
            .await?;

            stock_repo::link_journal_entry_tx(&mut tx, &ctx.tenant_id, &move_ids, entry_id)
                .await?;

            invoice_repo::mark_posted_tx(
                &mut tx,
                &ctx.tenant_id,
                invoice_id,
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
                "invoice.post",
                "Invoice",
                &invoice_id.to_string(),
                Some(json!({
                    "number": invoice.number,
                    "total": totals.total,
                    "journalEntryId": entry_id,
                })),
            )
            .await?;

            let mut envelopes = vec![
                journal_entry_created_event(ctx, entry_id, totals.total),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::INVOICE_POSTED,
                    types::AGG_INVOICE,
                    invoice_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "invoiceId": invoice_id,
                        "number": invoice.number,
                        "customerId": invoice.customer_id,
                        "subtotal": totals.subtotal,
                        "taxAmount": totals.tax_amount,
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

            let body = load_invoice_response(state, &ctx.tenant_id, invoice_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}

pub fn recalc_requested_event(
    ctx: &WriteContext,
    item_id: Uuid,
    location_id: Uuid,
    from: NaiveDate,
) -> EventEnvelope<serde_json::Value> {
    EventEnvelope::new(
        ctx.tenant_id.clone(),
        types::INVENTORY_RECALC_REQUESTED,
        types::AGG_STOCK_ITEM,
        item_id.to_string(),
        ctx.correlation_id,
        json!({
            "itemId": item_id,
            "locationId": location_id,
            "recalcFromDate": from,
        }),
    )
}

// ---------------------------------------------------------------------------
// Void
// ---------------------------------------------------------------------------

pub async fn void_invoice(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
    request: VoidRequest,
) -> DomainResult<CommandResponse> {
    // Stock keys come from the moves the posting created
    let mut keys = vec![doc_lock_key("invoice:void", &ctx.tenant_id, invoice_id)];
    if let Ok(moves) = stock_repo::moves_for_reference(
        &state.pool,
        &ctx.tenant_id,
        types::AGG_INVOICE,
        invoice_id,
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

            let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
                .await?
                .ok_or_else(|| DomainError::not_found("invoice not found"))?;
            if !invoice.status.can_void() {
                return Err(DomainError::validation(
                    "only posted invoices without payments can be voided",
                ));
            }

            if payment_repo::has_active_tx(&mut tx, &ctx.tenant_id, PaymentDocKind::Invoice, invoice_id)
                .await?
            {
                return Err(DomainError::validation(
                    "cannot void an invoice with recorded payments",
                ));
            }
            if invoice_repo::has_posted_credit_notes_tx(&mut tx, &ctx.tenant_id, invoice_id).await? {
                return Err(DomainError::validation(
                    "cannot void an invoice with posted credit notes",
                ));
            }

            let posting_entry_id = invoice
                .journal_entry_id
                .ok_or_else(|| DomainError::internal("posted invoice has no journal entry"))?;

            let reason = request
                .reason
                .clone()
                .unwrap_or_else(|| format!("Void invoice {}", invoice.number));

            let mut envelopes = Vec::new();

            // Supersede an active adjustment before reversing the original
            if let Some(adjustment_id) = invoice.last_adjustment_journal_entry_id {
                let reversal_id = reverse_entry(
                    &mut tx,
                    ctx,
                    adjustment_id,
                    &format!("Supersede adjustment for invoice {}", invoice.number),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, reversal_id, Decimal::ZERO));
                envelopes.push(journal_entry_reversed_event(ctx, adjustment_id, reversal_id));
            }

            let void_entry_id = reverse_entry(&mut tx, ctx, posting_entry_id, &reason).await?;

            // Restock tracked goods at the exact costs the sale issued
            let moves = stock_repo::moves_for_reference_tx(
                &mut tx,
                &ctx.tenant_id,
                types::AGG_INVOICE,
                invoice_id,
            )
            .await?;
            let mut return_move_ids = Vec::new();
            for mv in moves
                .iter()
                .filter(|m| m.move_type == MoveType::SaleIssue)
            {
                let applied = inventory::apply(
                    &mut tx,
                    ctx,
                    &MoveRequest {
                        location_id: mv.location_id,
                        item_id: mv.item_id,
                        date: ctx.now.date_naive(),
                        move_type: MoveType::SaleReturn,
                        direction: MoveDirection::In,
                        quantity: mv.quantity,
                        unit_cost: mv.unit_cost_applied,
                        total_cost_override: Some(mv.total_cost_applied),
                        reference_type: types::AGG_INVOICE.to_string(),
                        reference_id: invoice_id,
                    },
                )
                .await?;
                return_move_ids.push(applied.move_id);
            }
            stock_repo::link_journal_entry_tx(
                &mut tx,
                &ctx.tenant_id,
                &return_move_ids,
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
            invoice_repo::mark_voided_tx(&mut tx, &ctx.tenant_id, invoice_id, void_entry_id)
                .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "invoice.void",
                "Invoice",
                &invoice_id.to_string(),
                Some(json!({ "reason": reason, "voidJournalEntryId": void_entry_id })),
            )
            .await?;

            envelopes.push(journal_entry_created_event(ctx, void_entry_id, invoice.total));
            envelopes.push(journal_entry_reversed_event(ctx, posting_entry_id, void_entry_id));
            envelopes.push(EventEnvelope::new(
                ctx.tenant_id.clone(),
                types::INVOICE_VOIDED,
                types::AGG_INVOICE,
                invoice_id.to_string(),
                ctx.correlation_id,
                json!({
                    "invoiceId": invoice_id,
                    "number": invoice.number,
                    "voidJournalEntryId": void_entry_id,
                }),
            ));
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_invoice_response(state, &ctx.tenant_id, invoice_id).await?;
            Ok(CommandResponse::ok(body))
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

// ---------------------------------------------------------------------------
// Posted-edit adjustment
// ---------------------------------------------------------------------------

pub async fn adjust_invoice(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
    request: InvoiceRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("invoice:adjust", &ctx.tenant_id, invoice_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
                .await?
                .ok_or_else(|| DomainError::not_found("invoice not found"))?;
            if !invoice.status.can_adjust() {
                return Err(DomainError::validation(
                    "only posted invoices can be adjusted",
                ));
            }

            if payment_repo::has_active_tx(&mut tx, &ctx.tenant_id, PaymentDocKind::Invoice, invoice_id)
                .await?
            {
                return Err(DomainError::validation(
                    "cannot adjust an invoice with recorded payments",
                ));
            }
            if invoice_repo::has_posted_credit_notes_tx(&mut tx, &ctx.tenant_id, invoice_id).await? {
                return Err(DomainError::validation(
                    "cannot adjust an invoice with posted credit notes",
                ));
            }

            // Inventory-changing edits must go through void + reissue
            let current_lines =
                invoice_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, invoice_id).await?;
            for line in &current_lines {
                let item = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, line.item_id)
                    .await?
                    .ok_or_else(|| DomainError::validation("line item not found"))?;
                if item.is_tracked() {
                    return Err(DomainError::validation(
                        "cannot adjust an inventory-tracked invoice (use credit note / void + reissue)",
                    ));
                }
            }

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, request.currency.as_deref())?;
            let ar_account = account_provision::configured_ar_account(&mut tx, &company).await?;

            let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

            // Desired posting lines under the same semantics as posting
            let mut income_buckets: BTreeMap<Uuid, Decimal> = BTreeMap::new();
            for insert in &built.inserts {
                let item = item_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, insert.item_id)
                    .await?
                    .ok_or_else(|| DomainError::validation("line item not found"))?;
                if item.is_tracked() {
                    return Err(DomainError::validation(
                        "cannot adjust an invoice onto inventory-tracked lines (use void + reissue)",
                    ));
                }

                let income_account = resolve_income_account(
                    &mut tx,
                    &ctx.tenant_id,
                    insert.income_account_id,
                    &item,
                )
                .await?;
                let line_subtotal = crate::money::line_subtotal(
                    insert.quantity,
                    insert.unit_price,
                    insert.discount_amount,
                );
                *income_buckets.entry(income_account).or_default() += line_subtotal;
            }

            let mut desired = vec![LedgerLine::debit(ar_account.id, built.total)];
            for (account_id, subtotal) in &income_buckets {
                desired.push(LedgerLine::credit(*account_id, round_money(*subtotal)));
            }
            if built.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                desired.push(LedgerLine::credit(tax_account.id, built.tax_amount));
            }

            let posting_entry_id = invoice
                .journal_entry_id
                .ok_or_else(|| DomainError::internal("posted invoice has no journal entry"))?;
            let original_lines = journal_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, posting_entry_id)
                .await?
                .iter()
                .map(|l| LedgerLine {
                    account_id: l.account_id,
                    debit: l.debit,
                    credit: l.credit,
                })
                .collect::<Vec<_>>();

            let mut envelopes = Vec::new();

            // Supersede the previous adjustment so the delta is measured
            // against the original posting
            if let Some(previous_adjustment) = invoice.last_adjustment_journal_entry_id {
                let reversal_id = reverse_entry(
                    &mut tx,
                    ctx,
                    previous_adjustment,
                    &format!("Supersede adjustment for invoice {}", invoice.number),
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
                        format!("Adjustment for invoice {}", invoice.number),
                        delta,
                        &ctx.user_id,
                    )
                    .skip_account_validation(),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, entry_id, Decimal::ZERO));
                Some(entry_id)
            };

            invoice_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, invoice_id, &built.inserts)
                .await?;
            invoice_repo::mark_adjusted_tx(
                &mut tx,
                &ctx.tenant_id,
                invoice_id,
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
                "invoice.adjust",
                "Invoice",
                &invoice_id.to_string(),
                Some(json!({
                    "previousTotal": invoice.total,
                    "newTotal": built.total,
                    "adjustmentJournalEntryId": adjustment_entry_id,
                })),
            )
            .await?;

            envelopes.push(EventEnvelope::new(
                ctx.tenant_id.clone(),
                types::INVOICE_ADJUSTED,
                types::AGG_INVOICE,
                invoice_id.to_string(),
                ctx.correlation_id,
                json!({
                    "invoiceId": invoice_id,
                    "previousTotal": invoice.total,
                    "newTotal": built.total,
                    "adjustmentJournalEntryId": adjustment_entry_id,
                }),
            ));
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_invoice_response(state, &ctx.tenant_id, invoice_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}
