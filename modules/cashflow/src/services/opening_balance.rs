//! Opening-balance posting
//!
//! Creating or editing a customer/vendor with a nonzero opening balance
//! posts the delta against Opening Balance Equity. A positive customer
//! balance means the customer owes us (Dr AR / Cr OBE); a positive vendor
//! balance means we owe the vendor (Dr OBE / Cr AP). Edits post only the
//! difference from the previously recorded balance.

use event_bus::EventEnvelope;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::context::WriteContext;
use crate::error::DomainResult;
use crate::events::types;
use crate::money::round_money;
use crate::repos::company_repo::Company;
use crate::services::account_provision;
use crate::services::ledger::{self, LedgerLine, NewJournalEntry};

/// Outcome of an opening-balance delta post
pub struct OpeningBalancePost {
    pub journal_entry_id: Uuid,
    pub envelope: EventEnvelope<serde_json::Value>,
}

/// Signed pair of lines for an opening-balance delta
///
/// `delta > 0` debits the primary account (the party owes/is owed more);
/// `delta < 0` swaps the sides. The caller supplies which account is
/// debited on a positive delta.
fn delta_lines(debit_on_positive: Uuid, credit_on_positive: Uuid, delta: Decimal) -> Vec<LedgerLine> {
    if delta > Decimal::ZERO {
        vec![
            LedgerLine::debit(debit_on_positive, delta),
            LedgerLine::credit(credit_on_positive, delta),
        ]
    } else {
        vec![
            LedgerLine::debit(credit_on_positive, -delta),
            LedgerLine::credit(debit_on_positive, -delta),
        ]
    }
}

/// Post the customer opening-balance delta; None when the delta is zero
pub async fn post_customer_delta(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &WriteContext,
    company: &Company,
    customer_id: Uuid,
    previous: Decimal,
    next: Decimal,
) -> DomainResult<Option<OpeningBalancePost>> {
    let delta = round_money(next - previous);
    if delta.is_zero() {
        return Ok(None);
    }

    let ar = account_provision::configured_ar_account(tx, company).await?;
    let obe = account_provision::configured_opening_balance_account(tx, company).await?;

    let entry_id = ledger::post_journal_entry(
        tx,
        NewJournalEntry::new(
            &ctx.tenant_id,
            ctx.now.date_naive(),
            format!("Opening balance for customer {customer_id}"),
            delta_lines(ar.id, obe.id, delta),
            &ctx.user_id,
        )
        .skip_account_validation(),
    )
    .await?;

    let envelope = EventEnvelope::new(
        ctx.tenant_id.clone(),
        types::OPENING_BALANCE_POSTED,
        types::AGG_CUSTOMER,
        customer_id.to_string(),
        ctx.correlation_id,
        json!({
            "customerId": customer_id,
            "delta": delta,
            "journalEntryId": entry_id,
        }),
    );

    Ok(Some(OpeningBalancePost {
        journal_entry_id: entry_id,
        envelope,
    }))
}

/// Post the vendor opening-balance delta; sign mirrored onto AP
pub async fn post_vendor_delta(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &WriteContext,
    company: &Company,
    vendor_id: Uuid,
    previous: Decimal,
    next: Decimal,
) -> DomainResult<Option<OpeningBalancePost>> {
    let delta = round_money(next - previous);
    if delta.is_zero() {
        return Ok(None);
    }

    let ap = account_provision::configured_ap_account(tx, company).await?;
    let obe = account_provision::configured_opening_balance_account(tx, company).await?;

    // Positive vendor balance: we owe more → Dr OBE / Cr AP
    let entry_id = ledger::post_journal_entry(
        tx,
        NewJournalEntry::new(
            &ctx.tenant_id,
            ctx.now.date_naive(),
            format!("Opening balance for vendor {vendor_id}"),
            delta_lines(obe.id, ap.id, delta),
            &ctx.user_id,
        )
        .skip_account_validation(),
    )
    .await?;

    let envelope = EventEnvelope::new(
        ctx.tenant_id.clone(),
        types::OPENING_BALANCE_POSTED,
        types::AGG_VENDOR,
        vendor_id.to_string(),
        ctx.correlation_id,
        json!({
            "vendorId": vendor_id,
            "delta": delta,
            "journalEntryId": entry_id,
        }),
    );

    Ok(Some(OpeningBalancePost {
        journal_entry_id: entry_id,
        envelope,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_positive_delta_debits_primary() {
        let primary = Uuid::from_u128(1);
        let offset = Uuid::from_u128(2);
        let lines = delta_lines(primary, offset, dec("250.00"));

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].account_id, primary);
        assert_eq!(lines[0].debit, dec("250.00"));
        assert_eq!(lines[1].account_id, offset);
        assert_eq!(lines[1].credit, dec("250.00"));
    }

    #[test]
    fn test_negative_delta_swaps_sides() {
        let primary = Uuid::from_u128(1);
        let offset = Uuid::from_u128(2);
        let lines = delta_lines(primary, offset, dec("-75.00"));

        assert_eq!(lines[0].account_id, offset);
        assert_eq!(lines[0].debit, dec("75.00"));
        assert_eq!(lines[1].account_id, primary);
        assert_eq!(lines[1].credit, dec("75.00"));
    }
}
