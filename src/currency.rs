use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{BudgetError, BudgetResult};
use crate::fields::MONTHS;

/// Converted amounts are rounded to cents.
pub const CONVERSION_DP: u32 = 2;

pub trait CurrencyConverter {
    /// Converts `amount` from one currency to another. Must return `amount`
    /// unchanged when `from == to`.
    fn convert(&self, amount: Decimal, from: &str, to: &str) -> BudgetResult<Decimal>;
}

/// Converts each month sequentially. All twelve must succeed.
pub fn convert_months(
    converter: &dyn CurrencyConverter,
    months: &[Decimal; MONTHS],
    from: &str,
    to: &str,
) -> BudgetResult<[Decimal; MONTHS]> {
    let mut out = [Decimal::ZERO; MONTHS];
    for (slot, value) in out.iter_mut().zip(months.iter()) {
        *slot = converter.convert(*value, from, to)?;
    }
    Ok(out)
}

/// Latest known rate per (base, quote) pair. A pair can be used in either
/// direction, and one intermediate currency may be used when no direct rate
/// exists.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    /// `quote` units per one `base`.
    rates: BTreeMap<(String, String), Decimal>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rates(rates: impl IntoIterator<Item = (String, String, Decimal)>) -> Self {
        let mut table = Self::new();
        for (base, quote, rate) in rates {
            table.insert(&base, &quote, rate);
        }
        table
    }

    pub fn insert(&mut self, base: &str, quote: &str, rate: Decimal) {
        self.rates
            .insert((base.to_ascii_uppercase(), quote.to_ascii_uppercase()), rate);
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    fn direct(&self, from: &str, to: &str) -> Option<Decimal> {
        if let Some(rate) = self.rates.get(&(from.to_string(), to.to_string())) {
            return Some(*rate);
        }
        match self.rates.get(&(to.to_string(), from.to_string())) {
            Some(rate) if !rate.is_zero() => Some(Decimal::ONE / *rate),
            _ => None,
        }
    }

    /// Multiplier turning `from` units into `to` units.
    pub fn rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let from = from.to_ascii_uppercase();
        let to = to.to_ascii_uppercase();
        if from == to {
            return Some(Decimal::ONE);
        }
        if let Some(rate) = self.direct(&from, &to) {
            return Some(rate);
        }

        let mut pivots: Vec<&str> = Vec::new();
        for (base, quote) in self.rates.keys() {
            if *base == from {
                pivots.push(quote);
            } else if *quote == from {
                pivots.push(base);
            }
        }
        pivots
            .into_iter()
            .find_map(|pivot| self.direct(&from, pivot)?.checked_mul(self.direct(pivot, &to)?))
    }
}

impl CurrencyConverter for RateTable {
    fn convert(&self, amount: Decimal, from: &str, to: &str) -> BudgetResult<Decimal> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(amount);
        }
        let Some(rate) = self.rate(from, to) else {
            return Err(BudgetError::CurrencyNotFound {
                from: from.to_ascii_uppercase(),
                to: to.to_ascii_uppercase(),
            });
        };
        let converted = amount.checked_mul(rate).ok_or_else(|| {
            BudgetError::InvalidInput(format!(
                "amount overflow converting {amount} {from} to {to}"
            ))
        })?;
        Ok(converted.round_dp_with_strategy(CONVERSION_DP, RoundingStrategy::MidpointAwayFromZero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> RateTable {
        RateTable::from_rates([
            ("USD".to_string(), "EUR".to_string(), dec!(0.9)),
            ("usd".to_string(), "ves".to_string(), dec!(45.2)),
        ])
    }

    #[test]
    fn identity_returns_amount_unchanged() {
        let empty = RateTable::new();
        assert_eq!(empty.convert(dec!(12.345), "JPY", "JPY").unwrap(), dec!(12.345));
        assert_eq!(empty.convert(dec!(3), "usd", "USD").unwrap(), dec!(3));
    }

    #[test]
    fn direct_and_inverse_rates() {
        let t = table();
        assert_eq!(t.convert(dec!(100), "USD", "EUR").unwrap(), dec!(90));
        assert_eq!(t.convert(dec!(90), "EUR", "USD").unwrap(), dec!(100));
        assert_eq!(t.convert(dec!(2), "USD", "VES").unwrap(), dec!(90.4));
    }

    #[test]
    fn pivots_through_shared_currency() {
        let t = table();
        // EUR -> USD -> VES
        assert_eq!(t.convert(dec!(9), "EUR", "VES").unwrap(), dec!(452));
    }

    #[test]
    fn round_trip_within_tolerance() {
        let t = table();
        let there = t.convert(dec!(123.45), "USD", "VES").unwrap();
        let back = t.convert(there, "VES", "USD").unwrap();
        assert!((back - dec!(123.45)).abs() <= dec!(0.01));
    }

    #[test]
    fn oversized_amount_fails_instead_of_overflowing() {
        let err = table().convert(Decimal::MAX, "USD", "VES").unwrap_err();
        assert!(matches!(err, BudgetError::InvalidInput(ref msg) if msg.contains("overflow")));
    }

    #[test]
    fn missing_path_is_currency_not_found() {
        let err = table().convert(dec!(1), "USD", "GBP").unwrap_err();
        assert!(matches!(err, BudgetError::CurrencyNotFound { ref to, .. } if to == "GBP"));
    }
}
