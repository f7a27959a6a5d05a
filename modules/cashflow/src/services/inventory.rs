//! Perpetual weighted-average-cost inventory engine
//!
//! [`apply`] executes one stock move under the balance row lock: IN moves
//! re-average the unit cost, OUT moves issue at the current average. The
//! cost math lives in pure helpers so the averaging rules are testable
//! without a database.
//!
//! Backdated inserts are detected, not recomputed: when a move lands before
//! the newest existing move for its (tenant, location, item), the returned
//! `recalc_from` date tells the caller to emit an
//! `inventory.recalc.requested` event for the downstream projection.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::context::WriteContext;
use crate::error::{DomainError, DomainResult};
use crate::money::round_money;
use crate::repos::stock_repo::{
    self, BalanceSnapshot, MoveDirection, MoveType, StockMoveInsert,
};

/// One stock move to apply
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub location_id: Uuid,
    pub item_id: Uuid,
    pub date: NaiveDate,
    pub move_type: MoveType,
    pub direction: MoveDirection,
    pub quantity: Decimal,
    /// Unit cost for IN moves; ignored for OUT moves (the current average
    /// applies) unless `total_cost_override` is set
    pub unit_cost: Decimal,
    /// Exact-reversal override: forces `total_cost_applied` and bypasses
    /// averaging-by-supplied-cost, so void paths restore the precise cost
    /// they removed
    pub total_cost_override: Option<Decimal>,
    pub reference_type: String,
    pub reference_id: Uuid,
}

/// Result of applying a move
#[derive(Debug, Clone)]
pub struct AppliedMove {
    pub move_id: Uuid,
    pub unit_cost_applied: Decimal,
    pub total_cost_applied: Decimal,
    /// Set when the move was backdated; caller emits the recalc event
    pub recalc_from: Option<NaiveDate>,
}

/// New balance and applied cost after an IN move
///
/// `newUnitCost = (qty·cost + inQty·inCost) / newQty`, rounded to 2dp.
pub fn wac_after_in(
    balance: BalanceSnapshot,
    in_qty: Decimal,
    in_unit_cost: Decimal,
    total_cost_override: Option<Decimal>,
) -> (BalanceSnapshot, Decimal, Decimal) {
    let total_in_cost = match total_cost_override {
        Some(total) => round_money(total),
        None => round_money(in_qty * in_unit_cost),
    };
    let unit_cost_applied = if in_qty.is_zero() {
        Decimal::ZERO
    } else {
        round_money(total_in_cost / in_qty)
    };

    let new_qty = balance.quantity + in_qty;
    let new_unit_cost = if new_qty.is_zero() {
        Decimal::ZERO
    } else {
        round_money((balance.quantity * balance.unit_cost + total_in_cost) / new_qty)
    };

    (
        BalanceSnapshot {
            quantity: new_qty,
            unit_cost: new_unit_cost,
        },
        unit_cost_applied,
        total_in_cost,
    )
}

/// New balance and applied cost after an OUT move
///
/// The issue cost is the current average; the average itself is unchanged.
pub fn wac_after_out(
    balance: BalanceSnapshot,
    out_qty: Decimal,
    total_cost_override: Option<Decimal>,
) -> (BalanceSnapshot, Decimal, Decimal) {
    let (unit_cost_applied, total_cost_applied) = match total_cost_override {
        Some(total) => {
            let total = round_money(total);
            let unit = if out_qty.is_zero() {
                Decimal::ZERO
            } else {
                round_money(total / out_qty)
            };
            (unit, total)
        }
        None => (
            balance.unit_cost,
            round_money(out_qty * balance.unit_cost),
        ),
    };

    (
        BalanceSnapshot {
            quantity: balance.quantity - out_qty,
            unit_cost: balance.unit_cost,
        },
        unit_cost_applied,
        total_cost_applied,
    )
}

/// Apply one move: lock the balance, compute costs, insert the move row,
/// write the new balance, detect backdating
pub async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &WriteContext,
    request: &MoveRequest,
) -> DomainResult<AppliedMove> {
    if request.quantity <= Decimal::ZERO {
        return Err(DomainError::validation("move quantity must be positive"));
    }

    let balance = stock_repo::balance_for_update_tx(
        tx,
        &ctx.tenant_id,
        request.location_id,
        request.item_id,
    )
    .await?
    .unwrap_or(BalanceSnapshot {
        quantity: Decimal::ZERO,
        unit_cost: Decimal::ZERO,
    });

    let (new_balance, unit_cost_applied, total_cost_applied) = match request.direction {
        MoveDirection::In => wac_after_in(
            balance,
            request.quantity,
            request.unit_cost,
            request.total_cost_override,
        ),
        MoveDirection::Out => {
            if request.quantity > balance.quantity {
                return Err(DomainError::validation(format!(
                    "insufficient stock: requested {} but only {} on hand",
                    request.quantity, balance.quantity
                )));
            }
            wac_after_out(balance, request.quantity, request.total_cost_override)
        }
    };

    // Backdated when the move predates the newest existing move for the key
    let max_date = stock_repo::max_move_date_tx(
        tx,
        &ctx.tenant_id,
        request.location_id,
        request.item_id,
    )
    .await?;
    let recalc_from = match max_date {
        Some(max) if request.date < max => Some(request.date),
        _ => None,
    };

    let move_id = stock_repo::insert_move_tx(
        tx,
        &ctx.tenant_id,
        &StockMoveInsert {
            location_id: request.location_id,
            item_id: request.item_id,
            move_date: request.date,
            move_type: request.move_type,
            direction: request.direction,
            quantity: request.quantity,
            unit_cost_applied,
            total_cost_applied,
            reference_type: request.reference_type.clone(),
            reference_id: request.reference_id,
            correlation_id: ctx.correlation_id,
            created_by: ctx.user_id.clone(),
        },
    )
    .await?;

    stock_repo::upsert_balance_tx(
        tx,
        &ctx.tenant_id,
        request.location_id,
        request.item_id,
        new_balance.quantity,
        new_balance.unit_cost,
    )
    .await?;

    Ok(AppliedMove {
        move_id,
        unit_cost_applied,
        total_cost_applied,
        recalc_from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn balance(qty: &str, cost: &str) -> BalanceSnapshot {
        BalanceSnapshot {
            quantity: dec(qty),
            unit_cost: dec(cost),
        }
    }

    #[test]
    fn test_in_averages_cost() {
        // 10 @ 3.00 then 10 @ 5.00 → 20 @ 4.00
        let (after_first, unit, total) =
            wac_after_in(balance("0", "0"), dec("10"), dec("3.00"), None);
        assert_eq!(after_first.quantity, dec("10"));
        assert_eq!(after_first.unit_cost, dec("3.00"));
        assert_eq!(unit, dec("3.00"));
        assert_eq!(total, dec("30.00"));

        let (after_second, _, total) = wac_after_in(after_first, dec("10"), dec("5.00"), None);
        assert_eq!(after_second.quantity, dec("20"));
        assert_eq!(after_second.unit_cost, dec("4.00"));
        assert_eq!(total, dec("50.00"));
    }

    #[test]
    fn test_out_issues_at_running_average() {
        // Issue 5 from 20 @ 4.00 → cost 20.00, average unchanged
        let (after, unit, total) = wac_after_out(balance("20", "4.00"), dec("5"), None);
        assert_eq!(after.quantity, dec("15"));
        assert_eq!(after.unit_cost, dec("4.00"));
        assert_eq!(unit, dec("4.00"));
        assert_eq!(total, dec("20.00"));
    }

    #[test]
    fn test_in_with_total_override_restores_exact_cost() {
        // Void restock: 3 units forced to cost exactly 10.00 total
        let (after, unit, total) = wac_after_in(
            balance("7", "4.00"),
            dec("3"),
            dec("999.00"),
            Some(dec("10.00")),
        );
        assert_eq!(total, dec("10.00"));
        assert_eq!(unit, dec("3.33"));
        // (7×4.00 + 10.00) / 10 = 3.80
        assert_eq!(after.quantity, dec("10"));
        assert_eq!(after.unit_cost, dec("3.80"));
    }

    #[test]
    fn test_out_with_total_override() {
        let (after, unit, total) =
            wac_after_out(balance("10", "4.00"), dec("4"), Some(dec("18.00")));
        assert_eq!(total, dec("18.00"));
        assert_eq!(unit, dec("4.50"));
        assert_eq!(after.quantity, dec("6"));
        assert_eq!(after.unit_cost, dec("4.00"));
    }

    #[test]
    fn test_uneven_average_rounds_to_cents() {
        // 3 @ 1.00 + 1 @ 2.00 → (3 + 2) / 4 = 1.25
        let (after, _, _) = wac_after_in(balance("3", "1.00"), dec("1"), dec("2.00"), None);
        assert_eq!(after.unit_cost, dec("1.25"));

        // 3 @ 1.00 + 1 @ 1.50 → 4.50 / 4 = 1.13 (half-up)
        let (after, _, _) = wac_after_in(balance("3", "1.00"), dec("1"), dec("1.50"), None);
        assert_eq!(after.unit_cost, dec("1.13"));
    }
}
