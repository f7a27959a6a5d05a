//! Expense (vendor bill) lifecycle: draft CRUD, approval, posting with the
//! paid-immediately variant, posted-edit adjustment, and void
//!
//! Normal posting books Dr expense accounts / Dr Tax Payable / Cr AP. The
//! paid-immediately variant credits the bank instead of AP, lands directly
//! on PAID, and synthesizes the matching payment row.

use std::collections::BTreeMap;

use event_bus::EventEnvelope;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::events::{self, types};
use crate::idempotency::CommandResponse;
use crate::locks::{doc_lock_key, DEFAULT_LOCK_TTL};
use crate::money::{line_subtotal, round_money};
use crate::repos::account_repo::{self, AccountType};
use crate::repos::company_repo;
use crate::repos::expense_repo::{self, Expense, ExpenseLine, ExpenseLineInsert, ExpenseStatus};
use crate::repos::journal_repo;
use crate::repos::payment_repo::{self, PaymentDocKind, PaymentInsert};
use crate::repos::sequence_repo::{self, DocType};
use crate::repos::{audit_repo, vendor_repo};
use crate::services::account_provision;
use crate::services::ledger::{self, LedgerLine, NewJournalEntry};
use crate::services::payment_service::{
    journal_entry_created_event, journal_entry_reversed_event, validate_bank_account,
};
use crate::services::period_guard::ensure_period_open;
use crate::validation::{
    ensure_currency_matches, optional_date, price_line, require_date, require_lines, sum_totals,
    ExpenseLineRequest, ExpenseRequest, PostExpenseRequest, VoidRequest,
};
use crate::AppState;

// ---------------------------------------------------------------------------
// JSON shape
// ---------------------------------------------------------------------------

pub fn expense_json(expense: &Expense, lines: &[ExpenseLine]) -> serde_json::Value {
    json!({
        "id": expense.id,
        "vendorId": expense.vendor_id,
        "number": expense.number,
        "status": expense.status,
        "expenseDate": expense.expense_date,
        "dueDate": expense.due_date,
        "currency": expense.currency,
        "subtotal": expense.subtotal,
        "discountAmount": expense.discount_amount,
        "taxAmount": expense.tax_amount,
        "total": expense.total,
        "amountPaid": expense.amount_paid,
        "journalEntryId": expense.journal_entry_id,
        "lastAdjustmentJournalEntryId": expense.last_adjustment_journal_entry_id,
        "voidJournalEntryId": expense.void_journal_entry_id,
        "createdAt": expense.created_at,
        "updatedAt": expense.updated_at,
        "lines": lines.iter().map(|line| json!({
            "id": line.id,
            "lineNo": line.line_no,
            "expenseAccountId": line.expense_account_id,
            "description": line.description,
            "quantity": line.quantity,
            "unitCost": line.unit_cost,
            "discountAmount": line.discount_amount,
            "taxRate": line.tax_rate,
            "taxAmount": line.tax_amount,
        })).collect::<Vec<_>>(),
    })
}

async fn load_expense_response(
    state: &AppState,
    tenant_id: &str,
    expense_id: Uuid,
) -> DomainResult<serde_json::Value> {
    let expense = expense_repo::fetch(&state.pool, tenant_id, expense_id)
        .await?
        .ok_or_else(|| DomainError::not_found("expense not found"))?;
    let lines = expense_repo::fetch_lines(&state.pool, tenant_id, expense_id).await?;
    Ok(expense_json(&expense, &lines))
}

// ---------------------------------------------------------------------------
// Draft line building
// ---------------------------------------------------------------------------

struct BuiltLines {
    inserts: Vec<ExpenseLineInsert>,
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total: Decimal,
}

async fn build_lines(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: &str,
    lines: &[ExpenseLineRequest],
) -> DomainResult<BuiltLines> {
    require_lines(lines)?;

    let mut inserts = Vec::with_capacity(lines.len());
    let mut priced = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        let account = account_repo::find_by_id_tx(tx, tenant_id, line.expense_account_id)
            .await?
            .filter(|a| a.is_active)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "line {}: expense account not found or inactive",
                    idx + 1
                ))
            })?;
        if account.account_type != AccountType::Expense {
            return Err(DomainError::validation(format!(
                "line {}: account must be of type EXPENSE",
                idx + 1
            )));
        }

        let computed = price_line(
            idx,
            line.quantity.unwrap_or(Decimal::ONE),
            line.unit_cost,
            line.discount_amount.unwrap_or(Decimal::ZERO),
            line.tax_rate.unwrap_or(Decimal::ZERO),
        )?;

        inserts.push(ExpenseLineInsert {
            expense_account_id: account.id,
            description: line.description.clone(),
            quantity: computed.quantity,
            unit_cost: computed.unit_amount,
            discount_amount: computed.discount_amount,
            tax_rate: computed.tax_rate,
            tax_amount: computed.tax_amount,
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

pub async fn create_expense(
    state: &AppState,
    ctx: &WriteContext,
    request: ExpenseRequest,
) -> DomainResult<CommandResponse> {
    let expense_date = require_date(&request.expense_date, "expenseDate")?;
    let due_date = optional_date(request.due_date.as_deref(), "dueDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    if let Some(vendor_id) = request.vendor_id {
        vendor_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, vendor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("vendor not found"))?;
    }

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    let expense_id = Uuid::new_v4();
    let number = sequence_repo::next_tx(&mut tx, &ctx.tenant_id, DocType::Expense).await?;

    expense_repo::insert_tx(
        &mut tx,
        &ctx.tenant_id,
        expense_id,
        request.vendor_id,
        &number,
        expense_date,
        due_date,
        request.currency.as_deref(),
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
        "expense.create",
        "Expense",
        &expense_id.to_string(),
        Some(json!({ "number": number, "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_expense_response(state, &ctx.tenant_id, expense_id).await?;
    Ok(CommandResponse::created(body))
}

pub async fn update_expense(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
    request: ExpenseRequest,
) -> DomainResult<CommandResponse> {
    let expense_date = require_date(&request.expense_date, "expenseDate")?;
    let due_date = optional_date(request.due_date.as_deref(), "dueDate")?;

    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
        .await?
        .ok_or_else(|| DomainError::not_found("expense not found"))?;
    if !expense.status.can_edit() {
        return Err(DomainError::validation("only draft expenses can be edited"));
    }

    let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
        .await?
        .ok_or_else(|| DomainError::not_found("company not found"))?;
    ensure_currency_matches(&company, request.currency.as_deref())?;

    if let Some(vendor_id) = request.vendor_id {
        vendor_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, vendor_id)
            .await?
            .ok_or_else(|| DomainError::not_found("vendor not found"))?;
    }

    let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

    expense_repo::update_draft_tx(
        &mut tx,
        &ctx.tenant_id,
        expense_id,
        request.vendor_id,
        expense_date,
        due_date,
        request.currency.as_deref(),
        built.subtotal,
        built.discount_amount,
        built.tax_amount,
        built.total,
    )
    .await?;
    expense_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, expense_id, &built.inserts).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "expense.update",
        "Expense",
        &expense_id.to_string(),
        Some(json!({ "total": built.total })),
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_expense_response(state, &ctx.tenant_id, expense_id).await?;
    Ok(CommandResponse::ok(body))
}

pub async fn delete_expense(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
) -> DomainResult<CommandResponse> {
    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
        .await?
        .ok_or_else(|| DomainError::not_found("expense not found"))?;
    if !expense.status.can_edit() {
        return Err(DomainError::validation(
            "only draft expenses can be deleted",
        ));
    }

    expense_repo::delete_draft_tx(&mut tx, &ctx.tenant_id, expense_id).await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "expense.delete",
        "Expense",
        &expense_id.to_string(),
        None,
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    Ok(CommandResponse::ok(json!({ "deleted": true, "id": expense_id })))
}

pub async fn approve_expense(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
) -> DomainResult<CommandResponse> {
    let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

    let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
        .await?
        .ok_or_else(|| DomainError::not_found("expense not found"))?;
    if !expense.status.can_approve() {
        return Err(DomainError::validation(
            "only draft expenses can be approved",
        ));
    }

    expense_repo::set_status_tx(&mut tx, &ctx.tenant_id, expense_id, ExpenseStatus::Approved)
        .await?;

    audit_repo::insert_tx(
        &mut tx,
        ctx,
        "expense.approve",
        "Expense",
        &expense_id.to_string(),
        None,
    )
    .await?;

    tx.commit().await.map_err(DomainError::from)?;

    let body = load_expense_response(state, &ctx.tenant_id, expense_id).await?;
    Ok(CommandResponse::ok(body))
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

pub async fn post_expense(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
    request: PostExpenseRequest,
) -> DomainResult<CommandResponse> {
    let preview = expense_repo::fetch(&state.pool, &ctx.tenant_id, expense_id)
        .await?
        .ok_or_else(|| DomainError::not_found("expense not found"))?;
    ensure_period_open(&state.pool, &ctx.tenant_id, preview.expense_date, "expense.post").await?;

    let paid_immediately = request.paid_immediately.unwrap_or(false);

    let keys = vec![doc_lock_key("expense:post", &ctx.tenant_id, expense_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
                .await?
                .ok_or_else(|| DomainError::not_found("expense not found"))?;
            if !expense.status.can_post() {
                return Err(DomainError::validation(
                    "only draft or approved expenses can be posted",
                ));
            }

            let lines = expense_repo::fetch_lines_tx(&mut tx, &ctx.tenant_id, expense_id).await?;
            require_lines(&lines)?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, expense.currency.as_deref())?;

            // Re-price stored lines and bucket by expense account
            let mut priced = Vec::with_capacity(lines.len());
            let mut expense_buckets: BTreeMap<Uuid, Decimal> = BTreeMap::new();

            for (idx, line) in lines.iter().enumerate() {
                let account =
                    account_repo::find_by_id_tx(&mut tx, &ctx.tenant_id, line.expense_account_id)
                        .await?
                        .filter(|a| a.is_active && a.account_type == AccountType::Expense)
                        .ok_or_else(|| {
                            DomainError::validation(format!(
                                "line {}: expense account not found or not EXPENSE",
                                idx + 1
                            ))
                        })?;

                let computed = price_line(
                    idx,
                    line.quantity,
                    line.unit_cost,
                    line.discount_amount,
                    line.tax_rate,
                )?;
                *expense_buckets.entry(account.id).or_default() += computed.subtotal;
                priced.push(computed);
            }

            let totals = sum_totals(&priced);
            if totals.total != expense.total {
                return Err(DomainError::validation(format!(
                    "recomputed total {} does not match stored total {}",
                    totals.total, expense.total
                )));
            }

            // Credit side: AP normally, the bank in the paid-immediately variant
            let (credit_account_id, banking_for_payment) = if paid_immediately {
                let bank_account_id = request.bank_account_id.ok_or_else(|| {
                    DomainError::validation("bankAccountId is required when paying immediately")
                })?;
                let (banking, bank_account) = validate_bank_account(
                    &mut tx,
                    &ctx.tenant_id,
                    bank_account_id,
                    request.payment_mode.as_deref(),
                )
                .await?;
                (bank_account.id, Some(banking))
            } else {
                let ap_account =
                    account_provision::configured_ap_account(&mut tx, &company).await?;
                (ap_account.id, None)
            };

            let mut entry_lines = Vec::new();
            for (account_id, subtotal) in &expense_buckets {
                entry_lines.push(LedgerLine::debit(*account_id, *subtotal));
            }
            if totals.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                entry_lines.push(LedgerLine::debit(tax_account.id, totals.tax_amount));
            }
            entry_lines.push(LedgerLine::credit(credit_account_id, totals.total));

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    expense.expense_date,
                    format!("Expense {}", expense.number),
                    entry_lines,
                    &ctx.user_id,
                )
                .skip_account_validation(),
            )
            .await?;

            // Paid-immediately: synthesize the payment row and land on PAID
            let (status, amount_paid) = if let Some(banking) = &banking_for_payment {
                let payment_id = payment_repo::insert_tx(
                    &mut tx,
                    &ctx.tenant_id,
                    PaymentDocKind::Expense,
                    &PaymentInsert {
                        parent_id: expense_id,
                        amount: totals.total,
                        payment_date: expense.expense_date,
                        bank_account_id: banking.id,
                        payment_mode: request.payment_mode.clone(),
                        attachment_url: None,
                        journal_entry_id: entry_id,
                        created_by: ctx.user_id.clone(),
                    },
                )
                .await?;
                tracing::debug!(
                    expense_id = %expense_id,
                    payment_id = %payment_id,
                    "synthesized payment for paid-immediately expense"
                );
                (ExpenseStatus::Paid, totals.total)
            } else {
                (ExpenseStatus::Posted, Decimal::ZERO)
            };

            expense_repo::mark_posted_tx(
                &mut tx,
                &ctx.tenant_id,
                expense_id,
                status,
                totals.subtotal,
                totals.discount_amount,
                totals.tax_amount,
                totals.total,
                amount_paid,
                entry_id,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "expense.post",
                "Expense",
                &expense_id.to_string(),
                Some(json!({
                    "number": expense.number,
                    "total": totals.total,
                    "paidImmediately": paid_immediately,
                    "journalEntryId": entry_id,
                })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, totals.total),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::BILL_POSTED,
                    types::AGG_EXPENSE,
                    expense_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "expenseId": expense_id,
                        "number": expense.number,
                        "vendorId": expense.vendor_id,
                        "total": totals.total,
                        "status": status,
                        "journalEntryId": entry_id,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_expense_response(state, &ctx.tenant_id, expense_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}

// ---------------------------------------------------------------------------
// Adjustment and void
// ---------------------------------------------------------------------------

pub async fn adjust_expense(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
    request: ExpenseRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("expense:adjust", &ctx.tenant_id, expense_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
                .await?
                .ok_or_else(|| DomainError::not_found("expense not found"))?;
            if !expense.status.can_adjust() {
                return Err(DomainError::validation(
                    "only posted expenses can be adjusted",
                ));
            }
            if payment_repo::has_active_tx(&mut tx, &ctx.tenant_id, PaymentDocKind::Expense, expense_id)
                .await?
            {
                return Err(DomainError::validation(
                    "cannot adjust an expense with recorded payments",
                ));
            }

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            ensure_currency_matches(&company, request.currency.as_deref())?;
            let ap_account = account_provision::configured_ap_account(&mut tx, &company).await?;

            let built = build_lines(&mut tx, &ctx.tenant_id, &request.lines).await?;

            let mut expense_buckets: BTreeMap<Uuid, Decimal> = BTreeMap::new();
            for insert in &built.inserts {
                *expense_buckets.entry(insert.expense_account_id).or_default() +=
                    line_subtotal(insert.quantity, insert.unit_cost, insert.discount_amount);
            }

            let mut desired = Vec::new();
            for (account_id, subtotal) in &expense_buckets {
                desired.push(LedgerLine::debit(*account_id, round_money(*subtotal)));
            }
            if built.tax_amount > Decimal::ZERO {
                let tax_account =
                    account_provision::tax_payable_account(&mut tx, &ctx.tenant_id).await?;
                desired.push(LedgerLine::debit(tax_account.id, built.tax_amount));
            }
            desired.push(LedgerLine::credit(ap_account.id, built.total));

            let posting_entry_id = expense
                .journal_entry_id
                .ok_or_else(|| DomainError::internal("posted expense has no journal entry"))?;
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

            if let Some(previous_adjustment) = expense.last_adjustment_journal_entry_id {
                let reversal_id = reverse_entry(
                    &mut tx,
                    ctx,
                    previous_adjustment,
                    &format!("Supersede adjustment for expense {}", expense.number),
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
                        format!("Adjustment for expense {}", expense.number),
                        delta,
                        &ctx.user_id,
                    )
                    .skip_account_validation(),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, entry_id, Decimal::ZERO));
                Some(entry_id)
            };

            expense_repo::replace_lines_tx(&mut tx, &ctx.tenant_id, expense_id, &built.inserts)
                .await?;
            expense_repo::mark_adjusted_tx(
                &mut tx,
                &ctx.tenant_id,
                expense_id,
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
                "expense.adjust",
                "Expense",
                &expense_id.to_string(),
                Some(json!({
                    "previousTotal": expense.total,
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

            let body = load_expense_response(state, &ctx.tenant_id, expense_id).await?;
            Ok(CommandResponse::ok(body))
        })
        .await
}

pub async fn void_expense(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
    request: VoidRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("expense:void", &ctx.tenant_id, expense_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
                .await?
                .ok_or_else(|| DomainError::not_found("expense not found"))?;
            if !expense.status.can_void() {
                return Err(DomainError::validation(
                    "only posted expenses without payments can be voided",
                ));
            }
            if payment_repo::has_active_tx(&mut tx, &ctx.tenant_id, PaymentDocKind::Expense, expense_id)
                .await?
            {
                return Err(DomainError::validation(
                    "cannot void an expense with recorded payments",
                ));
            }

            let posting_entry_id = expense
                .journal_entry_id
                .ok_or_else(|| DomainError::internal("posted expense has no journal entry"))?;

            let reason = request
                .reason
                .clone()
                .unwrap_or_else(|| format!("Void expense {}", expense.number));

            let mut envelopes = Vec::new();

            if let Some(adjustment_id) = expense.last_adjustment_journal_entry_id {
                let reversal_id = reverse_entry(
                    &mut tx,
                    ctx,
                    adjustment_id,
                    &format!("Supersede adjustment for expense {}", expense.number),
                )
                .await?;
                envelopes.push(journal_entry_created_event(ctx, reversal_id, Decimal::ZERO));
                envelopes.push(journal_entry_reversed_event(ctx, adjustment_id, reversal_id));
            }

            let void_entry_id = reverse_entry(&mut tx, ctx, posting_entry_id, &reason).await?;

            journal_repo::mark_voided_tx(
                &mut tx,
                &ctx.tenant_id,
                posting_entry_id,
                &reason,
                &ctx.user_id,
            )
            .await?;
            expense_repo::mark_voided_tx(&mut tx, &ctx.tenant_id, expense_id, void_entry_id)
                .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "expense.void",
                "Expense",
                &expense_id.to_string(),
                Some(json!({ "reason": reason, "voidJournalEntryId": void_entry_id })),
            )
            .await?;

            envelopes.push(journal_entry_created_event(ctx, void_entry_id, expense.total));
            envelopes.push(journal_entry_reversed_event(ctx, posting_entry_id, void_entry_id));
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let body = load_expense_response(state, &ctx.tenant_id, expense_id).await?;
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
