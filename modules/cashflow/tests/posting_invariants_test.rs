//! Invariants of the posting math, exercised end to end at the pure layer:
//! weighted-average costing, FIFO return allocation, reversal neutrality,
//! and adjustment supersede semantics.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use cashflow_api::money::round_money;
use cashflow_api::repos::stock_repo::{BalanceSnapshot, MoveDirection, MoveType, StockMove};
use cashflow_api::services::credit_note_service::allocate_returns;
use cashflow_api::services::inventory::{wac_after_in, wac_after_out};
use cashflow_api::services::ledger::{adjustment_lines, totals, LedgerLine};
use cashflow_api::services::payment_service::invoice_paid_status;
use cashflow_api::repos::invoice_repo::InvoiceStatus;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn acct(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Two purchase receipts then a sale: 10 @ 3.00 + 10 @ 5.00 averages to
/// 4.00; issuing 5 costs 20.00 and leaves the average untouched.
#[test]
fn test_wac_purchase_then_sale_flow() {
    let empty = BalanceSnapshot {
        quantity: Decimal::ZERO,
        unit_cost: Decimal::ZERO,
    };

    let (after_first, _, _) = wac_after_in(empty, dec("10"), dec("3.00"), None);
    let (after_second, _, _) = wac_after_in(after_first, dec("10"), dec("5.00"), None);
    assert_eq!(after_second.quantity, dec("20"));
    assert_eq!(after_second.unit_cost, dec("4.00"));

    let (after_sale, unit_cost_applied, total_cost_applied) =
        wac_after_out(after_second, dec("5"), None);
    assert_eq!(unit_cost_applied, dec("4.00"));
    assert_eq!(total_cost_applied, dec("20.00"));
    assert_eq!(after_sale.quantity, dec("15"));
    assert_eq!(after_sale.unit_cost, dec("4.00"));
}

/// A sale issue followed by an exact-cost return restores the starting
/// balance precisely, even when the running average has drifted since.
#[test]
fn test_exact_return_restores_balance() {
    let start = BalanceSnapshot {
        quantity: dec("20"),
        unit_cost: dec("4.00"),
    };

    let (after_sale, _, issue_cost) = wac_after_out(start, dec("5"), None);

    // Return at the exact issued cost
    let (after_return, _, _) = wac_after_in(after_sale, dec("5"), dec("4.00"), Some(issue_cost));
    assert_eq!(after_return.quantity, dec("20"));
    assert_eq!(after_return.unit_cost, dec("4.00"));
}

fn sale_issue(location: u128, qty: &str, unit_cost: &str) -> StockMove {
    StockMove {
        id: Uuid::new_v4(),
        tenant_id: "t1".to_string(),
        location_id: Uuid::from_u128(location),
        item_id: Uuid::from_u128(42),
        move_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
        move_type: MoveType::SaleIssue,
        direction: MoveDirection::Out,
        quantity: dec(qty),
        unit_cost_applied: dec(unit_cost),
        total_cost_applied: round_money(dec(qty) * dec(unit_cost)),
        reference_type: "Invoice".to_string(),
        reference_id: Uuid::from_u128(7),
        correlation_id: Uuid::new_v4(),
        created_by: "u1".to_string(),
        journal_entry_id: None,
        created_at: Utc::now(),
    }
}

/// Returns never exceed what the invoice issued, per (item, location)
#[test]
fn test_returns_bounded_by_issues() {
    let issues = vec![sale_issue(1, "6", "4.00"), sale_issue(2, "4", "5.00")];

    // Full capacity is 10; an 11-unit return must fail
    assert!(allocate_returns(&issues, &BTreeMap::new(), dec("11")).is_err());

    // Returning everything is fine and costs 6×4.00 + 4×5.00 = 44.00
    let all = allocate_returns(&issues, &BTreeMap::new(), dec("10")).unwrap();
    let total: Decimal = all.iter().map(|a| a.cost()).sum();
    assert_eq!(round_money(total), dec("44.00"));
}

/// Prior returns consume capacity before new ones: 3 returned from L1
/// leaves 3 there, so a 5-unit return spills 2 into L2 at L2's cost.
#[test]
fn test_fifo_allocation_across_locations() {
    let issues = vec![sale_issue(1, "6", "4.00"), sale_issue(2, "4", "5.00")];
    let mut returned = BTreeMap::new();
    returned.insert(Uuid::from_u128(1), dec("3"));

    let allocations = allocate_returns(&issues, &returned, dec("5")).unwrap();
    let total: Decimal = allocations.iter().map(|a| a.cost()).sum();
    assert_eq!(round_money(total), dec("22.00"));
}

/// Posting lines and their reversal cancel per account
#[test]
fn test_reversal_nets_to_zero() {
    let ar = acct(1);
    let income = acct(2);
    let cogs = acct(3);
    let inventory = acct(4);

    let posting = vec![
        LedgerLine::debit(ar, dec("50.00")),
        LedgerLine::credit(income, dec("50.00")),
        LedgerLine::debit(cogs, dec("20.00")),
        LedgerLine::credit(inventory, dec("20.00")),
    ];
    let reversal: Vec<LedgerLine> = posting
        .iter()
        .map(|l| LedgerLine {
            account_id: l.account_id,
            debit: l.credit,
            credit: l.debit,
        })
        .collect();

    // The adjustment between the two is the delta needed to go from the
    // posting to its reversal; applying posting + reversal nets to zero,
    // so posting vs posting yields no delta at all.
    let no_delta = adjustment_lines(&posting, &posting).unwrap();
    assert!(no_delta.is_empty());

    let mut net: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for line in posting.iter().chain(reversal.iter()) {
        *net.entry(line.account_id).or_default() += line.debit - line.credit;
    }
    assert!(net.values().all(|v| v.is_zero()));
}

/// Adjusting T0 → T1 produces a delta entry of |T1 − T0| on each side;
/// a second adjustment to T2 (after the first is superseded) is measured
/// against the original posting again.
#[test]
fn test_adjustment_supersede_round_trip() {
    let ar = acct(1);
    let income = acct(2);

    let t0 = vec![
        LedgerLine::debit(ar, dec("100.00")),
        LedgerLine::credit(income, dec("100.00")),
    ];
    let t1 = vec![
        LedgerLine::debit(ar, dec("130.00")),
        LedgerLine::credit(income, dec("130.00")),
    ];
    let t2 = vec![
        LedgerLine::debit(ar, dec("90.00")),
        LedgerLine::credit(income, dec("90.00")),
    ];

    let first = adjustment_lines(&t0, &t1).unwrap();
    let (d, c) = totals(&first);
    assert_eq!(d, dec("30.00"));
    assert_eq!(c, dec("30.00"));

    // After the first adjustment is reversed, the second delta is against
    // the original posting, not the intermediate state
    let second = adjustment_lines(&t0, &t2).unwrap();
    let (d, c) = totals(&second);
    assert_eq!(d, dec("10.00"));
    assert_eq!(c, dec("10.00"));

    let ar_line = second.iter().find(|l| l.account_id == ar).unwrap();
    assert_eq!(ar_line.credit, dec("10.00"));
}

/// Payment lifecycle: 60 of 100 is PARTIAL, the exact remainder flips to
/// PAID, and reversing everything lands back on POSTED.
#[test]
fn test_payment_status_progression() {
    let total = dec("100.00");

    assert_eq!(invoice_paid_status(total, dec("60.00")), InvoiceStatus::Partial);
    assert_eq!(invoice_paid_status(total, dec("100.00")), InvoiceStatus::Paid);
    assert_eq!(invoice_paid_status(total, Decimal::ZERO), InvoiceStatus::Posted);

    // Remaining-balance guard arithmetic from the service: a 40.01 attempt
    // against 40.00 remaining must be over
    let remaining = round_money(total - dec("60.00"));
    assert_eq!(remaining, dec("40.00"));
    assert!(dec("40.01") > remaining);
    assert!(dec("40.00") <= remaining);
}
