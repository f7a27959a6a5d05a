//! Ledger poster
//!
//! Builds and persists balanced journal entries. The derivations used by
//! void and posted-edit flows (`reversal_lines`, `adjustment_lines`) are
//! pure functions over [`LedgerLine`]; the transactional wrapper
//! [`post_journal_entry`] validates and persists.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::money::round_money;
use crate::repos::journal_repo::{self, JournalEntryLine, JournalLineInsert};
use crate::repos::account_repo;

/// One side of a journal entry, before persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLine {
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl LedgerLine {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: round_money(amount),
            credit: Decimal::ZERO,
        }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: round_money(amount),
        }
    }
}

/// Sum debits and credits at 2dp
pub fn totals(lines: &[LedgerLine]) -> (Decimal, Decimal) {
    let debit = round_money(lines.iter().map(|l| l.debit).sum());
    let credit = round_money(lines.iter().map(|l| l.credit).sum());
    (debit, credit)
}

/// Swap each line's sides: the reversal of an entry
pub fn reversal_lines(original: &[JournalEntryLine]) -> Vec<LedgerLine> {
    original
        .iter()
        .map(|line| LedgerLine {
            account_id: line.account_id,
            debit: round_money(line.credit),
            credit: round_money(line.debit),
        })
        .collect()
}

/// Minimal balanced delta between two posting line sets
///
/// Computes per-account net (`desired − original`, where net of a line is
/// debit − credit); positive nets become debits, negative nets credits,
/// zero nets are omitted. An empty result means no adjustment entry is
/// needed. Exactly one surviving account cannot balance and is rejected.
pub fn adjustment_lines(
    original: &[LedgerLine],
    desired: &[LedgerLine],
) -> DomainResult<Vec<LedgerLine>> {
    let mut net_by_account: BTreeMap<Uuid, Decimal> = BTreeMap::new();

    for line in original {
        *net_by_account.entry(line.account_id).or_default() -= line.debit - line.credit;
    }
    for line in desired {
        *net_by_account.entry(line.account_id).or_default() += line.debit - line.credit;
    }

    let lines: Vec<LedgerLine> = net_by_account
        .into_iter()
        .filter_map(|(account_id, net)| {
            let net = round_money(net);
            if net.is_zero() {
                None
            } else if net > Decimal::ZERO {
                Some(LedgerLine::debit(account_id, net))
            } else {
                Some(LedgerLine::credit(account_id, -net))
            }
        })
        .collect();

    if lines.len() == 1 {
        return Err(DomainError::validation(
            "adjustment would be unbalanced (single-account delta)",
        ));
    }

    Ok(lines)
}

/// Parameters for posting a journal entry
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub tenant_id: String,
    pub entry_date: NaiveDate,
    pub description: String,
    pub lines: Vec<LedgerLine>,
    pub created_by: String,
    pub location_id: Option<Uuid>,
    pub reversal_of_journal_entry_id: Option<Uuid>,
    pub reversal_reason: Option<String>,
    pub skip_account_validation: bool,
}

impl NewJournalEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        entry_date: NaiveDate,
        description: impl Into<String>,
        lines: Vec<LedgerLine>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entry_date,
            description: description.into(),
            lines,
            created_by: created_by.into(),
            location_id: None,
            reversal_of_journal_entry_id: None,
            reversal_reason: None,
            skip_account_validation: false,
        }
    }

    pub fn with_location(mut self, location_id: Option<Uuid>) -> Self {
        self.location_id = location_id;
        self
    }

    pub fn as_reversal_of(mut self, original_id: Uuid, reason: impl Into<String>) -> Self {
        self.reversal_of_journal_entry_id = Some(original_id);
        self.reversal_reason = Some(reason.into());
        self
    }

    /// Callers that just validated the accounts themselves may skip the
    /// poster's own lookup round trip
    pub fn skip_account_validation(mut self) -> Self {
        self.skip_account_validation = true;
        self
    }
}

/// Validate invariants and persist entry + lines atomically with the
/// caller's transaction; returns the new entry id
pub async fn post_journal_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: NewJournalEntry,
) -> DomainResult<Uuid> {
    if entry.lines.len() < 2 {
        return Err(DomainError::validation(
            "journal entry requires at least 2 lines",
        ));
    }

    for line in &entry.lines {
        let debit_set = !line.debit.is_zero();
        let credit_set = !line.credit.is_zero();
        if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
            return Err(DomainError::validation(
                "journal line amounts must be non-negative",
            ));
        }
        if debit_set == credit_set {
            return Err(DomainError::validation(
                "each journal line must have exactly one of debit or credit",
            ));
        }
    }

    let (total_debit, total_credit) = totals(&entry.lines);
    if total_debit != total_credit {
        return Err(DomainError::validation(format!(
            "journal entry is not balanced: debits {total_debit} != credits {total_credit}"
        )));
    }

    if !entry.skip_account_validation {
        let mut ids: Vec<Uuid> = entry.lines.iter().map(|l| l.account_id).collect();
        ids.sort();
        ids.dedup();
        let active = account_repo::count_active_by_ids_tx(tx, &entry.tenant_id, &ids).await?;
        if active != ids.len() as i64 {
            return Err(DomainError::validation(
                "journal entry references an unknown or inactive account",
            ));
        }
    }

    let entry_id = Uuid::new_v4();
    let insert_result = journal_repo::insert_entry_tx(
        tx,
        entry_id,
        &entry.tenant_id,
        entry.entry_date,
        &entry.description,
        entry.location_id,
        &entry.created_by,
        entry.reversal_of_journal_entry_id,
        entry.reversal_reason.as_deref(),
    )
    .await;

    if let Err(e) = insert_result {
        if is_reversal_conflict(&e) {
            return Err(DomainError::conflict(
                "journal entry has already been reversed",
            ));
        }
        return Err(e.into());
    }

    let line_inserts: Vec<JournalLineInsert> = entry
        .lines
        .iter()
        .map(|line| JournalLineInsert {
            account_id: line.account_id,
            debit: round_money(line.debit),
            credit: round_money(line.credit),
        })
        .collect();

    journal_repo::bulk_insert_lines_tx(tx, &entry.tenant_id, entry_id, &line_inserts).await?;

    tracing::debug!(
        tenant_id = %entry.tenant_id,
        journal_entry_id = %entry_id,
        total = %total_debit,
        "journal entry posted"
    );

    Ok(entry_id)
}

/// Post the reversal of an existing entry: swapped lines, linked back via
/// `reversal_of_journal_entry_id`
///
/// Fails with a conflict when a direct reversal already exists (checked
/// up front, and enforced again by the unique index at insert).
pub async fn reverse_entry(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: &str,
    entry_date: NaiveDate,
    created_by: &str,
    original_entry_id: Uuid,
    reason: &str,
) -> DomainResult<Uuid> {
    if journal_repo::has_direct_reversal_tx(tx, tenant_id, original_entry_id).await? {
        return Err(DomainError::conflict(
            "journal entry has already been reversed",
        ));
    }

    let (_, original_lines) =
        journal_repo::fetch_entry_with_lines_tx(tx, tenant_id, original_entry_id)
            .await?
            .ok_or_else(|| DomainError::internal("journal entry missing"))?;

    post_journal_entry(
        tx,
        NewJournalEntry::new(
            tenant_id,
            entry_date,
            format!("Reversal: {reason}"),
            reversal_lines(&original_lines),
            created_by,
        )
        .as_reversal_of(original_entry_id, reason)
        .skip_account_validation(),
    )
    .await
}

/// Unique violation on the one-reversal-per-original index
fn is_reversal_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .constraint()
            .is_some_and(|c| c == "uq_journal_entries_reversal_of"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn acct(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_totals_round_at_two_places() {
        let lines = vec![
            LedgerLine::debit(acct(1), dec("10.005")),
            LedgerLine::credit(acct(2), dec("10.01")),
        ];
        let (debit, credit) = totals(&lines);
        assert_eq!(debit, dec("10.01"));
        assert_eq!(credit, dec("10.01"));
    }

    #[test]
    fn test_reversal_swaps_sides() {
        let original = vec![
            JournalEntryLine {
                id: Uuid::new_v4(),
                tenant_id: "t1".into(),
                journal_entry_id: Uuid::new_v4(),
                line_no: 1,
                account_id: acct(1),
                debit: dec("100.00"),
                credit: Decimal::ZERO,
            },
            JournalEntryLine {
                id: Uuid::new_v4(),
                tenant_id: "t1".into(),
                journal_entry_id: Uuid::new_v4(),
                line_no: 2,
                account_id: acct(2),
                debit: Decimal::ZERO,
                credit: dec("100.00"),
            },
        ];

        let reversed = reversal_lines(&original);
        assert_eq!(reversed.len(), 2);
        assert_eq!(reversed[0].credit, dec("100.00"));
        assert_eq!(reversed[0].debit, Decimal::ZERO);
        assert_eq!(reversed[1].debit, dec("100.00"));
        assert_eq!(reversed[1].credit, Decimal::ZERO);
    }

    #[test]
    fn test_adjustment_no_change_is_empty() {
        let original = vec![
            LedgerLine::debit(acct(1), dec("100.00")),
            LedgerLine::credit(acct(2), dec("100.00")),
        ];
        let desired = original.clone();

        let delta = adjustment_lines(&original, &desired).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_adjustment_total_change() {
        // Invoice total raised from 100.00 to 130.00: Dr AR 30 / Cr Income 30
        let ar = acct(1);
        let income = acct(2);
        let original = vec![
            LedgerLine::debit(ar, dec("100.00")),
            LedgerLine::credit(income, dec("100.00")),
        ];
        let desired = vec![
            LedgerLine::debit(ar, dec("130.00")),
            LedgerLine::credit(income, dec("130.00")),
        ];

        let delta = adjustment_lines(&original, &desired).unwrap();
        assert_eq!(delta.len(), 2);

        let ar_line = delta.iter().find(|l| l.account_id == ar).unwrap();
        assert_eq!(ar_line.debit, dec("30.00"));

        let income_line = delta.iter().find(|l| l.account_id == income).unwrap();
        assert_eq!(income_line.credit, dec("30.00"));

        let (d, c) = totals(&delta);
        assert_eq!(d, c);
        assert_eq!(d, dec("30.00"));
    }

    #[test]
    fn test_adjustment_lowered_total_swaps_sides() {
        let ar = acct(1);
        let income = acct(2);
        let original = vec![
            LedgerLine::debit(ar, dec("130.00")),
            LedgerLine::credit(income, dec("130.00")),
        ];
        let desired = vec![
            LedgerLine::debit(ar, dec("100.00")),
            LedgerLine::credit(income, dec("100.00")),
        ];

        let delta = adjustment_lines(&original, &desired).unwrap();
        let ar_line = delta.iter().find(|l| l.account_id == ar).unwrap();
        assert_eq!(ar_line.credit, dec("30.00"));
        let income_line = delta.iter().find(|l| l.account_id == income).unwrap();
        assert_eq!(income_line.debit, dec("30.00"));
    }

    #[test]
    fn test_adjustment_rebucketed_income_nets_per_account() {
        // Revenue moved from one income account to another, total unchanged:
        // AR nets to zero and drops out
        let ar = acct(1);
        let income_a = acct(2);
        let income_b = acct(3);
        let original = vec![
            LedgerLine::debit(ar, dec("100.00")),
            LedgerLine::credit(income_a, dec("100.00")),
        ];
        let desired = vec![
            LedgerLine::debit(ar, dec("100.00")),
            LedgerLine::credit(income_b, dec("100.00")),
        ];

        let delta = adjustment_lines(&original, &desired).unwrap();
        assert_eq!(delta.len(), 2);
        assert!(delta.iter().all(|l| l.account_id != ar));

        let a_line = delta.iter().find(|l| l.account_id == income_a).unwrap();
        assert_eq!(a_line.debit, dec("100.00"));
        let b_line = delta.iter().find(|l| l.account_id == income_b).unwrap();
        assert_eq!(b_line.credit, dec("100.00"));
    }

    #[test]
    fn test_adjustment_single_account_delta_rejected() {
        let ar = acct(1);
        let income = acct(2);
        let original = vec![
            LedgerLine::debit(ar, dec("100.00")),
            LedgerLine::credit(income, dec("100.00")),
        ];
        // Only the AR side moved: impossible to balance
        let desired = vec![
            LedgerLine::debit(ar, dec("120.00")),
            LedgerLine::credit(income, dec("100.00")),
        ];

        assert!(adjustment_lines(&original, &desired).is_err());
    }
}
