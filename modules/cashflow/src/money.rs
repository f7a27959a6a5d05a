//! Fixed-scale decimal arithmetic for money and tax rates
//!
//! All monetary amounts in the system are decimals rescaled to 2 places; tax
//! rates carry 4 places and live in [0, 1]. Rescaling happens at computation
//! boundaries through this module only, so business code never touches floats
//! and never calls `round_dp` directly.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

/// Scale used for monetary amounts
pub const MONEY_SCALE: u32 = 2;

/// Scale used for tax rates
pub const RATE_SCALE: u32 = 4;

/// Rescale a monetary amount to 2 decimal places (half-up)
///
/// The result always carries exactly two fractional digits so serialized
/// amounts render as `"100.00"`, never `"100"` or `"100.0"`.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Rescale a tax rate to 4 decimal places (half-up)
pub fn round_rate(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(RATE_SCALE);
    rounded
}

/// True when the rate is a valid tax rate in [0, 1]
pub fn is_valid_rate(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE
}

/// Parse a monetary amount from a decimal string
///
/// Accepts plain decimal strings (`"50"`, `"50.00"`, `"-3.5"`); the result is
/// rescaled to 2dp. Scientific notation is rejected.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains(['e', 'E']) {
        return None;
    }
    trimmed.parse::<Decimal>().ok().map(round_money)
}

/// Parse an ISO 8601 date, day precision
///
/// Accepts `YYYY-MM-DD` with or without a time suffix; the time portion is
/// dropped (dates are day-normalized throughout the core).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    NaiveDate::parse_from_str(day_part, "%Y-%m-%d").ok()
}

/// Line subtotal: `quantity × unit_price − discount`, at 2dp
pub fn line_subtotal(quantity: Decimal, unit_price: Decimal, discount: Decimal) -> Decimal {
    round_money(quantity * unit_price - discount)
}

/// Line tax: `subtotal × rate`, at 2dp
pub fn line_tax(subtotal: Decimal, rate: Decimal) -> Decimal {
    round_money(subtotal * rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec("1.005")), dec("1.01"));
        assert_eq!(round_money(dec("1.004")), dec("1.00"));
        assert_eq!(round_money(dec("-1.005")), dec("-1.01"));
        assert_eq!(round_money(dec("2.5")), dec("2.50"));
    }

    #[test]
    fn test_round_rate_four_places() {
        assert_eq!(round_rate(dec("0.07125")), dec("0.0713"));
        assert_eq!(round_rate(dec("0.05")), dec("0.0500"));
    }

    #[test]
    fn test_rate_range() {
        assert!(is_valid_rate(dec("0")));
        assert!(is_valid_rate(dec("1")));
        assert!(is_valid_rate(dec("0.0825")));
        assert!(!is_valid_rate(dec("1.0001")));
        assert!(!is_valid_rate(dec("-0.01")));
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("50"), Some(dec("50.00")));
        assert_eq!(parse_money(" 50.005 "), Some(dec("50.01")));
        assert_eq!(parse_money("1e3"), None);
        assert_eq!(parse_money(""), None);
        assert_eq!(parse_money("abc"), None);
    }

    #[test]
    fn test_parse_date_day_precision() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        assert_eq!(parse_date("2026-03-15"), Some(expected));
        assert_eq!(parse_date("2026-03-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_date("2026-03-15 10:30:00"), Some(expected));
        assert_eq!(parse_date("15/03/2026"), None);
    }

    #[test]
    fn test_line_math() {
        // 2 × 50.00 − 0 = 100.00
        assert_eq!(
            line_subtotal(dec("2"), dec("50.00"), Decimal::ZERO),
            dec("100.00")
        );
        // discount applies after quantity extension
        assert_eq!(
            line_subtotal(dec("3"), dec("9.99"), dec("5.00")),
            dec("24.97")
        );
        assert_eq!(line_tax(dec("100.00"), dec("0.0500")), dec("5.00"));
        assert_eq!(line_tax(dec("24.97"), dec("0.0825")), dec("2.06"));
        assert_eq!(line_tax(dec("100.00"), Decimal::ZERO), dec("0.00"));
    }
}
