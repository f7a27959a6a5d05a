//! Request payloads and pure pricing validation
//!
//! Every document service runs its line items through the helpers here
//! before touching the database: quantities must be positive, rates live in
//! [0, 1], discounts cannot exceed the extended price, and all amounts are
//! rescaled at 2dp. The same recomputation runs again at posting time and
//! must reproduce the stored totals exactly.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::money::{is_valid_rate, line_subtotal, line_tax, parse_date, round_money, round_rate};
use crate::repos::company_repo::Company;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesLineRequest {
    pub item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
    pub income_account_id: Option<Uuid>,
    /// Credit notes link back to the invoice line being returned
    pub invoice_line_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest {
    pub customer_id: Uuid,
    pub invoice_date: String,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub location_id: Option<Uuid>,
    pub lines: Vec<SalesLineRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditNoteRequest {
    pub customer_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub note_date: String,
    pub currency: Option<String>,
    pub location_id: Option<Uuid>,
    pub lines: Vec<SalesLineRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseLineRequest {
    pub expense_account_id: Uuid,
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_cost: Decimal,
    pub discount_amount: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRequest {
    pub vendor_id: Option<Uuid>,
    pub expense_date: String,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub lines: Vec<ExpenseLineRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseLineRequest {
    pub item_id: Uuid,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub discount_amount: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
    pub expense_account_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseBillRequest {
    pub vendor_id: Uuid,
    pub bill_date: String,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub location_id: Option<Uuid>,
    pub lines: Vec<PurchaseLineRequest>,
}

/// Post-variant body for expenses: the paid-immediately path bypasses AP
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostExpenseRequest {
    pub paid_immediately: Option<bool>,
    pub bank_account_id: Option<Uuid>,
    pub payment_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub payment_date: String,
    pub bank_account_id: Uuid,
    pub payment_mode: Option<String>,
    pub pending_proof_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub amount: Decimal,
    pub refund_date: String,
    pub bank_account_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoidRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyRequest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub opening_balance: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRequest {
    pub name: String,
    pub sku: Option<String>,
    pub item_type: Option<String>,
    pub track_inventory: Option<bool>,
    pub unit_price: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub income_account_id: Option<Uuid>,
    pub expense_account_id: Option<Uuid>,
    pub default_location_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Computed line sets
// ---------------------------------------------------------------------------

/// One priced line after validation, amounts at 2dp
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub quantity: Decimal,
    pub unit_amount: Decimal,
    pub discount_amount: Decimal,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
}

/// Document totals after validation
#[derive(Debug, Clone)]
pub struct PricedTotals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Validate and price one line
///
/// `subtotal = quantity × unit − discount`, `tax = subtotal × rate`.
pub fn price_line(
    index: usize,
    quantity: Decimal,
    unit_amount: Decimal,
    discount_amount: Decimal,
    tax_rate: Decimal,
) -> DomainResult<PricedLine> {
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "line {}: quantity must be positive",
            index + 1
        )));
    }
    if unit_amount < Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "line {}: unit amount must be non-negative",
            index + 1
        )));
    }
    if discount_amount < Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "line {}: discount must be non-negative",
            index + 1
        )));
    }
    if !is_valid_rate(tax_rate) {
        return Err(DomainError::validation(format!(
            "line {}: tax rate must be between 0 and 1",
            index + 1
        )));
    }

    let unit_amount = round_money(unit_amount);
    let discount_amount = round_money(discount_amount);
    let extended = round_money(quantity * unit_amount);
    if discount_amount > extended {
        return Err(DomainError::validation(format!(
            "line {}: discount cannot exceed line amount of {}",
            index + 1,
            extended
        )));
    }

    let tax_rate = round_rate(tax_rate);
    let subtotal = line_subtotal(quantity, unit_amount, discount_amount);
    let tax_amount = line_tax(subtotal, tax_rate);

    Ok(PricedLine {
        quantity,
        unit_amount,
        discount_amount,
        subtotal,
        tax_rate,
        tax_amount,
    })
}

/// Sum priced lines into document totals
pub fn sum_totals(lines: &[PricedLine]) -> PricedTotals {
    let subtotal = round_money(lines.iter().map(|l| l.subtotal).sum());
    let discount_amount = round_money(lines.iter().map(|l| l.discount_amount).sum());
    let tax_amount = round_money(lines.iter().map(|l| l.tax_amount).sum());
    let total = round_money(subtotal + tax_amount);

    PricedTotals {
        subtotal,
        discount_amount,
        tax_amount,
        total,
    }
}

/// Reject empty line sets (every document needs at least one line)
pub fn require_lines<T>(lines: &[T]) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation("at least one line is required"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dates, currency, timezone
// ---------------------------------------------------------------------------

/// Parse a required ISO date field
pub fn require_date(raw: &str, field: &str) -> DomainResult<NaiveDate> {
    parse_date(raw).ok_or_else(|| DomainError::validation(format!("{field} is not a valid date")))
}

/// Parse an optional ISO date field
pub fn optional_date(raw: Option<&str>, field: &str) -> DomainResult<Option<NaiveDate>> {
    match raw {
        Some(value) => require_date(value, field).map(Some),
        None => Ok(None),
    }
}

/// A document currency must equal the tenant base currency when both are set
pub fn ensure_currency_matches(company: &Company, currency: Option<&str>) -> DomainResult<()> {
    if let (Some(base), Some(doc)) = (company.base_currency.as_deref(), currency) {
        if !doc.eq_ignore_ascii_case(base) {
            return Err(DomainError::validation(format!(
                "currency {doc} does not match company base currency {base}"
            )));
        }
    }
    Ok(())
}

/// Today's date in the tenant's timezone (fixed offset, e.g. `+07:00`)
///
/// An unparseable offset falls back to UTC.
pub fn today_in_time_zone(now: DateTime<Utc>, time_zone: &str) -> NaiveDate {
    match time_zone.parse::<FixedOffset>() {
        Ok(offset) => now.with_timezone(&offset).date_naive(),
        Err(_) => now.date_naive(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_price_line_basic() {
        // 2 × 50.00, no discount, no tax
        let line = price_line(0, dec("2"), dec("50.00"), Decimal::ZERO, Decimal::ZERO).unwrap();
        assert_eq!(line.subtotal, dec("100.00"));
        assert_eq!(line.tax_amount, dec("0.00"));
    }

    #[test]
    fn test_price_line_discount_and_tax() {
        let line = price_line(0, dec("3"), dec("10.00"), dec("5.00"), dec("0.05")).unwrap();
        assert_eq!(line.subtotal, dec("25.00"));
        assert_eq!(line.tax_rate, dec("0.0500"));
        assert_eq!(line.tax_amount, dec("1.25"));
    }

    #[test]
    fn test_price_line_rejects_bad_inputs() {
        assert!(price_line(0, dec("0"), dec("10.00"), Decimal::ZERO, Decimal::ZERO).is_err());
        assert!(price_line(0, dec("-1"), dec("10.00"), Decimal::ZERO, Decimal::ZERO).is_err());
        assert!(price_line(0, dec("1"), dec("-0.01"), Decimal::ZERO, Decimal::ZERO).is_err());
        assert!(price_line(0, dec("1"), dec("10.00"), dec("-1"), Decimal::ZERO).is_err());
        // tax rate out of [0, 1]
        assert!(price_line(0, dec("1"), dec("10.00"), Decimal::ZERO, dec("1.01")).is_err());
        // discount larger than the extended amount
        assert!(price_line(0, dec("1"), dec("10.00"), dec("10.01"), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_sum_totals() {
        let lines = vec![
            price_line(0, dec("2"), dec("50.00"), Decimal::ZERO, Decimal::ZERO).unwrap(),
            price_line(1, dec("1"), dec("40.00"), dec("10.00"), dec("0.10")).unwrap(),
        ];
        let totals = sum_totals(&lines);
        assert_eq!(totals.subtotal, dec("130.00"));
        assert_eq!(totals.discount_amount, dec("10.00"));
        assert_eq!(totals.tax_amount, dec("3.00"));
        assert_eq!(totals.total, dec("133.00"));
    }

    #[test]
    fn test_single_line_round_trips_exactly() {
        // quantity 1, zero discount: stored and recomputed totals agree
        let line = price_line(0, dec("1"), dec("99.99"), Decimal::ZERO, Decimal::ZERO).unwrap();
        let totals = sum_totals(std::slice::from_ref(&line));
        assert_eq!(totals.subtotal, dec("99.99"));
        assert_eq!(totals.total, dec("99.99"));

        let again = price_line(0, dec("1"), dec("99.99"), Decimal::ZERO, Decimal::ZERO).unwrap();
        assert_eq!(again.subtotal, totals.subtotal);
    }

    #[test]
    fn test_require_date_accepts_day_and_timestamp() {
        assert!(require_date("2026-07-01", "invoiceDate").is_ok());
        assert!(require_date("2026-07-01T08:00:00Z", "invoiceDate").is_ok());
        assert!(require_date("July 1", "invoiceDate").is_err());
    }

    #[test]
    fn test_today_in_time_zone_offsets() {
        // 2026-07-01 20:00 UTC is already 2026-07-02 in +07:00
        let now = "2026-07-01T20:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            today_in_time_zone(now, "+07:00"),
            NaiveDate::from_ymd_opt(2026, 7, 2).unwrap()
        );
        assert_eq!(
            today_in_time_zone(now, "+00:00"),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
        );
        // junk falls back to UTC
        assert_eq!(
            today_in_time_zone(now, "not-a-zone"),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
        );
    }
}
