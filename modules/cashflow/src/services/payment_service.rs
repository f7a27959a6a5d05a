//! Payment recording and reversal
//!
//! Invoice payments post Dr Bank / Cr AR; expense and purchase-bill
//! payments post Dr AP / Cr Bank. Recording never exceeds the document's
//! remaining balance; reversal posts the swapped lines as a linked reversal
//! entry and recomputes the parent status from the surviving payments.

use event_bus::EventEnvelope;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::events::{self, types};
use crate::idempotency::CommandResponse;
use crate::locks::{doc_lock_key, DEFAULT_LOCK_TTL};
use crate::money::round_money;
use crate::repos::account_repo::{Account, AccountType};
use crate::repos::banking_repo::{self, BankingAccount, BankingKind};
use crate::repos::expense_repo::{self, ExpenseStatus};
use crate::repos::invoice_repo::{self, InvoiceStatus};
use crate::repos::payment_repo::{self, PaymentDocKind, PaymentInsert, PaymentRow};
use crate::repos::purchase_bill_repo::{self, PurchaseBillStatus};
use crate::repos::{audit_repo, company_repo};
use crate::services::account_provision;
use crate::services::ledger::{self, LedgerLine, NewJournalEntry};
use crate::services::period_guard::ensure_period_open;
use crate::validation::{require_date, PaymentRequest, ReversalRequest};
use crate::AppState;

// ---------------------------------------------------------------------------
// Pure status derivation
// ---------------------------------------------------------------------------

/// Invoice status from total vs amount paid
pub fn invoice_paid_status(total: Decimal, paid: Decimal) -> InvoiceStatus {
    if paid <= Decimal::ZERO {
        InvoiceStatus::Posted
    } else if paid >= total {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    }
}

pub fn expense_paid_status(total: Decimal, paid: Decimal) -> ExpenseStatus {
    if paid <= Decimal::ZERO {
        ExpenseStatus::Posted
    } else if paid >= total {
        ExpenseStatus::Paid
    } else {
        ExpenseStatus::Partial
    }
}

pub fn bill_paid_status(total: Decimal, paid: Decimal) -> PurchaseBillStatus {
    if paid <= Decimal::ZERO {
        PurchaseBillStatus::Posted
    } else if paid >= total {
        PurchaseBillStatus::Paid
    } else {
        PurchaseBillStatus::Partial
    }
}

// ---------------------------------------------------------------------------
// Shared validation
// ---------------------------------------------------------------------------

/// Resolve a banking account and its ledger account for receiving/sending
/// money. Credit cards are rejected, and a supplied payment mode must match
/// the banking kind.
pub async fn validate_bank_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: &str,
    banking_account_id: Uuid,
    payment_mode: Option<&str>,
) -> DomainResult<(BankingAccount, Account)> {
    let banking = banking_repo::find_by_id_tx(tx, tenant_id, banking_account_id)
        .await?
        .ok_or_else(|| DomainError::not_found("bank account not found"))?;

    if !banking.is_active {
        return Err(DomainError::validation("bank account is inactive"));
    }
    if banking.kind == BankingKind::CreditCard {
        return Err(DomainError::validation(
            "credit card accounts cannot be used for payments",
        ));
    }
    if let Some(mode) = payment_mode {
        if !mode.eq_ignore_ascii_case(banking.kind.as_str()) {
            return Err(DomainError::validation(format!(
                "payment mode {mode} does not match bank account kind {}",
                banking.kind.as_str()
            )));
        }
    }

    let ledger_account = crate::repos::account_repo::find_by_id_tx(tx, tenant_id, banking.account_id)
        .await?
        .ok_or_else(|| DomainError::validation("bank ledger account not found"))?;

    if !ledger_account.is_active || ledger_account.account_type != AccountType::Asset {
        return Err(DomainError::validation(
            "bank ledger account must be an active ASSET account",
        ));
    }

    Ok((banking, ledger_account))
}

fn positive_amount(amount: Decimal) -> DomainResult<Decimal> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation("amount must be positive"));
    }
    Ok(amount)
}

/// Serialize a payment row; `parent_field` names the owning document key
pub fn payment_json(payment: &PaymentRow, parent_field: &str) -> serde_json::Value {
    let mut value = json!({
        "id": payment.id,
        "amount": payment.amount,
        "paymentDate": payment.payment_date,
        "bankAccountId": payment.bank_account_id,
        "paymentMode": payment.payment_mode,
        "attachmentUrl": payment.attachment_url,
        "journalEntryId": payment.journal_entry_id,
        "reversedAt": payment.reversed_at,
        "reversalJournalEntryId": payment.reversal_journal_entry_id,
        "createdBy": payment.created_by,
        "createdAt": payment.created_at,
    });
    value[parent_field] = json!(payment.parent_id);
    value
}

// ---------------------------------------------------------------------------
// Invoice payments
// ---------------------------------------------------------------------------

pub async fn record_invoice_payment(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
    request: PaymentRequest,
) -> DomainResult<CommandResponse> {
    let amount = positive_amount(request.amount)?;
    let payment_date = require_date(&request.payment_date, "paymentDate")?;
    ensure_period_open(&state.pool, &ctx.tenant_id, payment_date, "payment.record").await?;

    let keys = vec![doc_lock_key("invoice:payment", &ctx.tenant_id, invoice_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
                .await?
                .ok_or_else(|| DomainError::not_found("invoice not found"))?;

            if !invoice.status.admits_payment() {
                return Err(DomainError::validation(
                    "only posted invoices can receive payments",
                ));
            }

            let (banking, bank_account) = validate_bank_account(
                &mut tx,
                &ctx.tenant_id,
                request.bank_account_id,
                request.payment_mode.as_deref(),
            )
            .await?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            let ar_account = account_provision::configured_ar_account(&mut tx, &company).await?;

            let already_paid =
                payment_repo::sum_active_tx(&mut tx, &ctx.tenant_id, PaymentDocKind::Invoice, invoice_id)
                    .await?;
            let remaining = round_money(invoice.total - already_paid);
            if amount > remaining {
                return Err(DomainError::validation(format!(
                    "amount cannot exceed remaining balance of {remaining}"
                )));
            }

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    payment_date,
                    format!("Payment for invoice {}", invoice.number),
                    vec![
                        LedgerLine::debit(bank_account.id, amount),
                        LedgerLine::credit(ar_account.id, amount),
                    ],
                    &ctx.user_id,
                )
                .skip_account_validation(),
            )
            .await?;

            // Attach a pending payment proof when the caller names one
            let attachment_url = match request.pending_proof_id.as_deref() {
                Some(proof_id) => {
                    take_pending_proof(&mut tx, ctx, &invoice, proof_id).await?
                }
                None => None,
            };

            let payment_id = payment_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Invoice,
                &PaymentInsert {
                    parent_id: invoice_id,
                    amount,
                    payment_date,
                    bank_account_id: banking.id,
                    payment_mode: request.payment_mode.clone(),
                    attachment_url,
                    journal_entry_id: entry_id,
                    created_by: ctx.user_id.clone(),
                },
            )
            .await?;

            let total_paid = round_money(already_paid + amount);
            let new_status = invoice_paid_status(invoice.total, total_paid);
            invoice_repo::update_paid_state_tx(
                &mut tx,
                &ctx.tenant_id,
                invoice_id,
                total_paid,
                new_status,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "payment.record",
                "Payment",
                &payment_id.to_string(),
                Some(json!({ "invoiceId": invoice_id, "amount": amount })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, amount),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::PAYMENT_RECORDED,
                    types::AGG_PAYMENT,
                    payment_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "paymentId": payment_id,
                        "invoiceId": invoice_id,
                        "amount": amount,
                        "paymentDate": payment_date,
                        "journalEntryId": entry_id,
                        "invoiceStatus": new_status,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let payment = payment_repo::list_for_parent(
                &state.pool,
                &ctx.tenant_id,
                PaymentDocKind::Invoice,
                invoice_id,
            )
            .await?
            .into_iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::internal("payment row missing after commit"))?;

            Ok(CommandResponse::created(payment_json(&payment, "invoiceId")))
        })
        .await
}

/// Consume a pending payment proof: returns its storage URI and marks the
/// proof used (never deleted)
async fn take_pending_proof(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ctx: &WriteContext,
    invoice: &invoice_repo::Invoice,
    proof_id: &str,
) -> DomainResult<Option<String>> {
    let mut proofs = invoice
        .pending_payment_proofs
        .as_array()
        .cloned()
        .unwrap_or_default();

    let Some(entry) = proofs
        .iter_mut()
        .find(|p| p.get("id").and_then(|v| v.as_str()) == Some(proof_id))
    else {
        return Err(DomainError::not_found("pending payment proof not found"));
    };

    let storage_uri = entry
        .get("storageUri")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if let Some(obj) = entry.as_object_mut() {
        obj.insert("used".to_string(), serde_json::Value::Bool(true));
    }

    invoice_repo::update_pending_proofs_tx(
        tx,
        &ctx.tenant_id,
        invoice.id,
        &serde_json::Value::Array(proofs),
    )
    .await?;

    Ok(storage_uri)
}

pub async fn reverse_invoice_payment(
    state: &AppState,
    ctx: &WriteContext,
    invoice_id: Uuid,
    payment_id: Uuid,
    request: ReversalRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("invoice:payment", &ctx.tenant_id, invoice_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let invoice = invoice_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, invoice_id)
                .await?
                .ok_or_else(|| DomainError::not_found("invoice not found"))?;

            let payment = payment_repo::lock_for_update_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Invoice,
                payment_id,
            )
            .await?
            .filter(|p| p.parent_id == invoice_id)
            .ok_or_else(|| DomainError::not_found("payment not found"))?;

            let reason = request
                .reason
                .clone()
                .unwrap_or_else(|| "payment reversal".to_string());

            let entry_id =
                reverse_payment_entry(&mut tx, ctx, PaymentDocKind::Invoice, &payment, &reason)
                    .await?;

            let total_paid = payment_repo::sum_active_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Invoice,
                invoice_id,
            )
            .await?;
            let new_status = invoice_paid_status(invoice.total, total_paid);
            invoice_repo::update_paid_state_tx(
                &mut tx,
                &ctx.tenant_id,
                invoice_id,
                total_paid,
                new_status,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "payment.reverse",
                "Payment",
                &payment_id.to_string(),
                Some(json!({ "invoiceId": invoice_id, "reason": reason })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, payment.amount),
                journal_entry_reversed_event(ctx, payment.journal_entry_id, entry_id),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::PAYMENT_REVERSED,
                    types::AGG_PAYMENT,
                    payment_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "paymentId": payment_id,
                        "invoiceId": invoice_id,
                        "amount": payment.amount,
                        "reversalJournalEntryId": entry_id,
                        "invoiceStatus": new_status,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let payment = payment_repo::list_for_parent(
                &state.pool,
                &ctx.tenant_id,
                PaymentDocKind::Invoice,
                invoice_id,
            )
            .await?
            .into_iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::internal("payment row missing after commit"))?;

            Ok(CommandResponse::ok(payment_json(&payment, "invoiceId")))
        })
        .await
}

/// Shared reversal mechanics: guard double reversal, post swapped lines,
/// stamp the payment
async fn reverse_payment_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ctx: &WriteContext,
    kind: PaymentDocKind,
    payment: &PaymentRow,
    reason: &str,
) -> DomainResult<Uuid> {
    if payment.is_reversed() {
        return Err(DomainError::conflict("payment has already been reversed"));
    }

    let entry_id = ledger::reverse_entry(
        tx,
        &ctx.tenant_id,
        ctx.now.date_naive(),
        &ctx.user_id,
        payment.journal_entry_id,
        reason,
    )
    .await?;

    payment_repo::stamp_reversed_tx(
        tx,
        &ctx.tenant_id,
        kind,
        payment.id,
        entry_id,
        Some(reason),
    )
    .await?;

    Ok(entry_id)
}

// ---------------------------------------------------------------------------
// Expense payments
// ---------------------------------------------------------------------------

pub async fn record_expense_payment(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
    request: PaymentRequest,
) -> DomainResult<CommandResponse> {
    let amount = positive_amount(request.amount)?;
    let payment_date = require_date(&request.payment_date, "paymentDate")?;
    ensure_period_open(&state.pool, &ctx.tenant_id, payment_date, "expense.payment").await?;

    let keys = vec![doc_lock_key("expense:payment", &ctx.tenant_id, expense_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
                .await?
                .ok_or_else(|| DomainError::not_found("expense not found"))?;

            if !expense.status.admits_payment() {
                return Err(DomainError::validation(
                    "only posted expenses can receive payments",
                ));
            }

            let (banking, bank_account) = validate_bank_account(
                &mut tx,
                &ctx.tenant_id,
                request.bank_account_id,
                request.payment_mode.as_deref(),
            )
            .await?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            let ap_account = account_provision::configured_ap_account(&mut tx, &company).await?;

            let already_paid = payment_repo::sum_active_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Expense,
                expense_id,
            )
            .await?;
            let remaining = round_money(expense.total - already_paid);
            if amount > remaining {
                return Err(DomainError::validation(format!(
                    "amount cannot exceed remaining balance of {remaining}"
                )));
            }

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    payment_date,
                    format!("Payment for expense {}", expense.number),
                    vec![
                        LedgerLine::debit(ap_account.id, amount),
                        LedgerLine::credit(bank_account.id, amount),
                    ],
                    &ctx.user_id,
                )
                .skip_account_validation(),
            )
            .await?;

            let payment_id = payment_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Expense,
                &PaymentInsert {
                    parent_id: expense_id,
                    amount,
                    payment_date,
                    bank_account_id: banking.id,
                    payment_mode: request.payment_mode.clone(),
                    attachment_url: None,
                    journal_entry_id: entry_id,
                    created_by: ctx.user_id.clone(),
                },
            )
            .await?;

            let total_paid = round_money(already_paid + amount);
            let new_status = expense_paid_status(expense.total, total_paid);
            expense_repo::update_paid_state_tx(
                &mut tx,
                &ctx.tenant_id,
                expense_id,
                total_paid,
                new_status,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "expense.payment.record",
                "ExpensePayment",
                &payment_id.to_string(),
                Some(json!({ "expenseId": expense_id, "amount": amount })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, amount),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::BILL_PAYMENT_RECORDED,
                    types::AGG_EXPENSE,
                    expense_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "paymentId": payment_id,
                        "expenseId": expense_id,
                        "amount": amount,
                        "journalEntryId": entry_id,
                        "expenseStatus": new_status,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let payment = payment_repo::list_for_parent(
                &state.pool,
                &ctx.tenant_id,
                PaymentDocKind::Expense,
                expense_id,
            )
            .await?
            .into_iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::internal("payment row missing after commit"))?;

            Ok(CommandResponse::created(payment_json(&payment, "expenseId")))
        })
        .await
}

pub async fn reverse_expense_payment(
    state: &AppState,
    ctx: &WriteContext,
    expense_id: Uuid,
    payment_id: Uuid,
    request: ReversalRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("expense:payment", &ctx.tenant_id, expense_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let expense = expense_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, expense_id)
                .await?
                .ok_or_else(|| DomainError::not_found("expense not found"))?;

            let payment = payment_repo::lock_for_update_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Expense,
                payment_id,
            )
            .await?
            .filter(|p| p.parent_id == expense_id)
            .ok_or_else(|| DomainError::not_found("payment not found"))?;

            let reason = request
                .reason
                .clone()
                .unwrap_or_else(|| "payment reversal".to_string());

            let entry_id =
                reverse_payment_entry(&mut tx, ctx, PaymentDocKind::Expense, &payment, &reason)
                    .await?;

            let total_paid = payment_repo::sum_active_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::Expense,
                expense_id,
            )
            .await?;
            let new_status = expense_paid_status(expense.total, total_paid);
            expense_repo::update_paid_state_tx(
                &mut tx,
                &ctx.tenant_id,
                expense_id,
                total_paid,
                new_status,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "expense.payment.reverse",
                "ExpensePayment",
                &payment_id.to_string(),
                Some(json!({ "expenseId": expense_id, "reason": reason })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, payment.amount),
                journal_entry_reversed_event(ctx, payment.journal_entry_id, entry_id),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::PAYMENT_REVERSED,
                    types::AGG_EXPENSE,
                    expense_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "paymentId": payment_id,
                        "expenseId": expense_id,
                        "amount": payment.amount,
                        "reversalJournalEntryId": entry_id,
                        "expenseStatus": new_status,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let payment = payment_repo::list_for_parent(
                &state.pool,
                &ctx.tenant_id,
                PaymentDocKind::Expense,
                expense_id,
            )
            .await?
            .into_iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::internal("payment row missing after commit"))?;

            Ok(CommandResponse::ok(payment_json(&payment, "expenseId")))
        })
        .await
}

// ---------------------------------------------------------------------------
// Purchase bill payments
// ---------------------------------------------------------------------------

pub async fn record_bill_payment(
    state: &AppState,
    ctx: &WriteContext,
    bill_id: Uuid,
    request: PaymentRequest,
) -> DomainResult<CommandResponse> {
    let amount = positive_amount(request.amount)?;
    let payment_date = require_date(&request.payment_date, "paymentDate")?;
    ensure_period_open(&state.pool, &ctx.tenant_id, payment_date, "bill.payment").await?;

    let keys = vec![doc_lock_key("bill:payment", &ctx.tenant_id, bill_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let bill = purchase_bill_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, bill_id)
                .await?
                .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;

            if !bill.status.admits_payment() {
                return Err(DomainError::validation(
                    "only posted purchase bills can receive payments",
                ));
            }

            let (banking, bank_account) = validate_bank_account(
                &mut tx,
                &ctx.tenant_id,
                request.bank_account_id,
                request.payment_mode.as_deref(),
            )
            .await?;

            let company = company_repo::fetch_tx(&mut tx, &ctx.tenant_id)
                .await?
                .ok_or_else(|| DomainError::not_found("company not found"))?;
            let ap_account = account_provision::configured_ap_account(&mut tx, &company).await?;

            let already_paid = payment_repo::sum_active_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::PurchaseBill,
                bill_id,
            )
            .await?;
            let remaining = round_money(bill.total - already_paid);
            if amount > remaining {
                return Err(DomainError::validation(format!(
                    "amount cannot exceed remaining balance of {remaining}"
                )));
            }

            let entry_id = ledger::post_journal_entry(
                &mut tx,
                NewJournalEntry::new(
                    &ctx.tenant_id,
                    payment_date,
                    format!("Payment for bill {}", bill.number),
                    vec![
                        LedgerLine::debit(ap_account.id, amount),
                        LedgerLine::credit(bank_account.id, amount),
                    ],
                    &ctx.user_id,
                )
                .skip_account_validation(),
            )
            .await?;

            let payment_id = payment_repo::insert_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::PurchaseBill,
                &PaymentInsert {
                    parent_id: bill_id,
                    amount,
                    payment_date,
                    bank_account_id: banking.id,
                    payment_mode: request.payment_mode.clone(),
                    attachment_url: None,
                    journal_entry_id: entry_id,
                    created_by: ctx.user_id.clone(),
                },
            )
            .await?;

            let total_paid = round_money(already_paid + amount);
            let new_status = bill_paid_status(bill.total, total_paid);
            purchase_bill_repo::update_paid_state_tx(
                &mut tx,
                &ctx.tenant_id,
                bill_id,
                total_paid,
                new_status,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "bill.payment.record",
                "PurchaseBillPayment",
                &payment_id.to_string(),
                Some(json!({ "purchaseBillId": bill_id, "amount": amount })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, amount),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::BILL_PAYMENT_RECORDED,
                    types::AGG_PURCHASE_BILL,
                    bill_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "paymentId": payment_id,
                        "purchaseBillId": bill_id,
                        "amount": amount,
                        "journalEntryId": entry_id,
                        "billStatus": new_status,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let payment = payment_repo::list_for_parent(
                &state.pool,
                &ctx.tenant_id,
                PaymentDocKind::PurchaseBill,
                bill_id,
            )
            .await?
            .into_iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::internal("payment row missing after commit"))?;

            Ok(CommandResponse::created(payment_json(
                &payment,
                "purchaseBillId",
            )))
        })
        .await
}

pub async fn reverse_bill_payment(
    state: &AppState,
    ctx: &WriteContext,
    bill_id: Uuid,
    payment_id: Uuid,
    request: ReversalRequest,
) -> DomainResult<CommandResponse> {
    let keys = vec![doc_lock_key("bill:payment", &ctx.tenant_id, bill_id)];
    state
        .locks
        .with_locks(&keys, DEFAULT_LOCK_TTL, async {
            let mut tx = state.pool.begin().await.map_err(DomainError::from)?;

            let bill = purchase_bill_repo::lock_for_update_tx(&mut tx, &ctx.tenant_id, bill_id)
                .await?
                .ok_or_else(|| DomainError::not_found("purchase bill not found"))?;

            let payment = payment_repo::lock_for_update_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::PurchaseBill,
                payment_id,
            )
            .await?
            .filter(|p| p.parent_id == bill_id)
            .ok_or_else(|| DomainError::not_found("payment not found"))?;

            let reason = request
                .reason
                .clone()
                .unwrap_or_else(|| "payment reversal".to_string());

            let entry_id = reverse_payment_entry(
                &mut tx,
                ctx,
                PaymentDocKind::PurchaseBill,
                &payment,
                &reason,
            )
            .await?;

            let total_paid = payment_repo::sum_active_tx(
                &mut tx,
                &ctx.tenant_id,
                PaymentDocKind::PurchaseBill,
                bill_id,
            )
            .await?;
            let new_status = bill_paid_status(bill.total, total_paid);
            purchase_bill_repo::update_paid_state_tx(
                &mut tx,
                &ctx.tenant_id,
                bill_id,
                total_paid,
                new_status,
            )
            .await?;

            audit_repo::insert_tx(
                &mut tx,
                ctx,
                "bill.payment.reverse",
                "PurchaseBillPayment",
                &payment_id.to_string(),
                Some(json!({ "purchaseBillId": bill_id, "reason": reason })),
            )
            .await?;

            let envelopes = vec![
                journal_entry_created_event(ctx, entry_id, payment.amount),
                journal_entry_reversed_event(ctx, payment.journal_entry_id, entry_id),
                EventEnvelope::new(
                    ctx.tenant_id.clone(),
                    types::PAYMENT_REVERSED,
                    types::AGG_PURCHASE_BILL,
                    bill_id.to_string(),
                    ctx.correlation_id,
                    json!({
                        "paymentId": payment_id,
                        "purchaseBillId": bill_id,
                        "amount": payment.amount,
                        "reversalJournalEntryId": entry_id,
                        "billStatus": new_status,
                    }),
                ),
            ];
            for envelope in &envelopes {
                events::enqueue_tx(&mut tx, envelope).await?;
            }

            tx.commit().await.map_err(DomainError::from)?;
            events::publish_after_commit(&state.pool, &state.bus, &envelopes).await;

            let payment = payment_repo::list_for_parent(
                &state.pool,
                &ctx.tenant_id,
                PaymentDocKind::PurchaseBill,
                bill_id,
            )
            .await?
            .into_iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| DomainError::internal("payment row missing after commit"))?;

            Ok(CommandResponse::ok(payment_json(&payment, "purchaseBillId")))
        })
        .await
}

// ---------------------------------------------------------------------------
// Shared event builders
// ---------------------------------------------------------------------------

pub fn journal_entry_created_event(
    ctx: &WriteContext,
    entry_id: Uuid,
    total: Decimal,
) -> EventEnvelope<serde_json::Value> {
    EventEnvelope::new(
        ctx.tenant_id.clone(),
        types::JOURNAL_ENTRY_CREATED,
        types::AGG_JOURNAL_ENTRY,
        entry_id.to_string(),
        ctx.correlation_id,
        json!({ "journalEntryId": entry_id, "total": total }),
    )
}

pub fn journal_entry_reversed_event(
    ctx: &WriteContext,
    original_entry_id: Uuid,
    reversal_entry_id: Uuid,
) -> EventEnvelope<serde_json::Value> {
    EventEnvelope::new(
        ctx.tenant_id.clone(),
        types::JOURNAL_ENTRY_REVERSED,
        types::AGG_JOURNAL_ENTRY,
        original_entry_id.to_string(),
        ctx.correlation_id,
        json!({
            "journalEntryId": original_entry_id,
            "reversalJournalEntryId": reversal_entry_id,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_invoice_status_from_payment_totals() {
        assert_eq!(
            invoice_paid_status(dec("100.00"), dec("0")),
            InvoiceStatus::Posted
        );
        assert_eq!(
            invoice_paid_status(dec("100.00"), dec("60.00")),
            InvoiceStatus::Partial
        );
        assert_eq!(
            invoice_paid_status(dec("100.00"), dec("100.00")),
            InvoiceStatus::Paid
        );
        assert_eq!(
            invoice_paid_status(dec("100.00"), dec("120.00")),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn test_reversal_restores_posted_not_paid() {
        // Invoice at 100 with a reversed 60 payment: back to POSTED
        assert_eq!(
            invoice_paid_status(dec("100.00"), dec("0.00")),
            InvoiceStatus::Posted
        );
    }

    #[test]
    fn test_expense_and_bill_status_derivation() {
        assert_eq!(
            expense_paid_status(dec("50.00"), dec("20.00")),
            ExpenseStatus::Partial
        );
        assert_eq!(
            expense_paid_status(dec("50.00"), dec("50.00")),
            ExpenseStatus::Paid
        );
        assert_eq!(
            bill_paid_status(dec("50.00"), dec("0.00")),
            PurchaseBillStatus::Posted
        );
        assert_eq!(
            bill_paid_status(dec("50.00"), dec("49.99")),
            PurchaseBillStatus::Partial
        );
    }
}
