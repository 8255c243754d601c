//! Currency conversion arithmetic.
//!
//! All functions here work at full `f64` precision. Rounding to minor units
//! happens once, on a total, through [`ConvertedTotal`].

use pocketbook_common::{round_minor_units, CurrencyCode};
use rust_decimal::Decimal;

use crate::error::{FxError, FxResult};

/// Factor turning an amount in the `from` currency into the `to` currency.
///
/// Both rates are units per one unit of the same base, so equal rates give
/// exactly `1.0`.
pub fn conversion_factor(from: (&str, f64), to: (&str, f64)) -> FxResult<f64> {
    for (currency, rate) in [from, to] {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FxError::InvalidRate {
                currency: currency.to_string(),
                rate,
            });
        }
    }
    Ok(to.1 / from.1)
}

/// Convert `amount` given the two snapshot rates.
pub fn convert_with_rates(amount: f64, from: (&str, f64), to: (&str, f64)) -> FxResult<f64> {
    Ok(amount * conversion_factor(from, to)?)
}

/// Running total of converted amounts in one target currency.
///
/// Amounts are summed unrounded; [`ConvertedTotal::round`] rounds the sum
/// exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedTotal {
    currency: CurrencyCode,
    sum: f64,
    count: usize,
}

impl ConvertedTotal {
    /// Start an empty total in `currency`.
    pub fn new(currency: CurrencyCode) -> Self {
        Self {
            currency,
            sum: 0.0,
            count: 0,
        }
    }

    /// Add an already converted amount.
    pub fn add(&mut self, converted: f64) {
        self.sum += converted;
        self.count += 1;
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    /// Unrounded sum.
    pub fn raw(&self) -> f64 {
        self.sum
    }

    /// Number of amounts added.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The sum rounded to the currency's minor units.
    pub fn round(&self) -> FxResult<Decimal> {
        round_minor_units(self.sum, self.currency.decimal_places())
            .ok_or(FxError::InvalidAmount(self.sum))
    }
}

impl Extend<f64> for ConvertedTotal {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for amount in iter {
            self.add(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    const USD: (&str, f64) = ("USD", 1.1);
    const EUR: (&str, f64) = ("EUR", 1.0);
    const GBP: (&str, f64) = ("GBP", 0.85);

    #[test]
    fn test_fixture_conversions() {
        let eur = convert_with_rates(100.0, USD, EUR).unwrap();
        assert!((eur - 90.909_090_909_090_9).abs() < 1e-9);

        let gbp = convert_with_rates(100.0, EUR, GBP).unwrap();
        assert_eq!(gbp, 85.0);
    }

    #[test]
    fn test_same_rate_factor_is_exactly_one() {
        assert_eq!(conversion_factor(USD, USD).unwrap(), 1.0);
        assert_eq!(conversion_factor(GBP, GBP).unwrap(), 1.0);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let result = conversion_factor(("XXX", 0.0), EUR);
        assert!(matches!(result, Err(FxError::InvalidRate { .. })));

        let result = conversion_factor(EUR, ("XXX", f64::NAN));
        assert!(matches!(result, Err(FxError::InvalidRate { .. })));
    }

    #[test]
    fn test_total_rounds_once() {
        // Per-element rounding of 1000 x 0.004 gives 0.00; the true total is 4.00.
        let mut total = ConvertedTotal::new(CurrencyCode::usd());
        total.extend(std::iter::repeat(0.004).take(1000));

        assert_eq!(total.len(), 1000);
        assert_eq!(total.round().unwrap(), dec!(4.00));
    }

    #[test]
    fn test_total_uses_currency_places() {
        let mut total = ConvertedTotal::new(CurrencyCode::parse("JPY").unwrap());
        total.add(1234.5);
        total.add(0.4);
        assert_eq!(total.round().unwrap(), dec!(1235));
    }

    #[test]
    fn test_empty_total() {
        let total = ConvertedTotal::new(CurrencyCode::eur());
        assert!(total.is_empty());
        assert_eq!(total.round().unwrap(), Decimal::ZERO);
    }

    fn rate() -> impl Strategy<Value = f64> {
        1e-3f64..1e4f64
    }

    fn amount() -> impl Strategy<Value = f64> {
        prop_oneof![-1e9f64..-1e-6f64, 1e-6f64..1e9f64]
    }

    proptest! {
        #[test]
        fn prop_identity_conversion(value in amount(), r in rate()) {
            prop_assert_eq!(convert_with_rates(value, ("AAA", r), ("AAA", r)).unwrap(), value);
        }

        #[test]
        fn prop_round_trip(value in amount(), a in rate(), b in rate()) {
            let there = convert_with_rates(value, ("AAA", a), ("BBB", b)).unwrap();
            let back = convert_with_rates(there, ("BBB", b), ("AAA", a)).unwrap();
            prop_assert!((back - value).abs() <= value.abs() * 1e-12);
        }
    }
}
