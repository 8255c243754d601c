//! The `total` command: convert many amounts, round the sum once.

use std::str::FromStr;

use pocketbook_common::CurrencyCode;
use pocketbook_fx::{ConvertedTotal, FxResult, RateCacheEngine};

/// One `AMOUNT:CODE` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountArg {
    pub amount: f64,
    pub currency: String,
}

impl FromStr for AmountArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (amount, currency) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected AMOUNT:CODE, got '{s}'"))?;
        let amount: f64 = amount
            .trim()
            .parse()
            .map_err(|_| format!("invalid amount '{amount}'"))?;
        if !amount.is_finite() {
            return Err(format!("invalid amount '{amount}'"));
        }
        let currency = currency.trim();
        if currency.is_empty() {
            return Err(format!("missing currency in '{s}'"));
        }
        Ok(Self {
            amount,
            currency: currency.to_string(),
        })
    }
}

/// Convert every amount into `to` and sum them unrounded.
pub async fn sum_converted(
    engine: &RateCacheEngine,
    amounts: &[AmountArg],
    to: &str,
) -> FxResult<ConvertedTotal> {
    let target = CurrencyCode::parse(to)
        .map_err(|_| pocketbook_fx::FxError::UnknownCurrency(to.to_string()))?;
    let mut total = ConvertedTotal::new(target);
    for item in amounts {
        total.add(engine.convert(item.amount, &item.currency, to).await?);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pocketbook_fx::{FxEngineConfig, FxError, InMemoryRateStore, MockRateProvider};
    use rust_decimal::Decimal;

    fn engine() -> RateCacheEngine {
        let rates = [("USD", 1.1), ("EUR", 1.0), ("GBP", 0.85)]
            .into_iter()
            .map(|(code, rate)| (code.to_string(), rate))
            .collect();
        RateCacheEngine::new(
            Arc::new(MockRateProvider::new("mock", rates)),
            Arc::new(InMemoryRateStore::new()),
            FxEngineConfig::default(),
        )
    }

    #[test]
    fn test_parse_amount_arg() {
        let arg: AmountArg = "12.50:usd".parse().unwrap();
        assert_eq!(arg.amount, 12.5);
        assert_eq!(arg.currency, "usd");

        let arg: AmountArg = "-3:EUR".parse().unwrap();
        assert_eq!(arg.amount, -3.0);
    }

    #[test]
    fn test_parse_amount_arg_rejects_garbage() {
        assert!("12.50".parse::<AmountArg>().is_err());
        assert!("abc:USD".parse::<AmountArg>().is_err());
        assert!("1.0:".parse::<AmountArg>().is_err());
        assert!("inf:USD".parse::<AmountArg>().is_err());
    }

    #[tokio::test]
    async fn test_sum_rounds_once() {
        let engine = engine();
        let amounts: Vec<AmountArg> = vec![
            "100:EUR".parse().unwrap(),
            "100:EUR".parse().unwrap(),
            "0:USD".parse().unwrap(),
        ];

        let total = sum_converted(&engine, &amounts, "GBP").await.unwrap();

        assert_eq!(total.len(), 3);
        assert_eq!(total.round().unwrap(), Decimal::new(17000, 2));
    }

    #[tokio::test]
    async fn test_sum_unknown_currency() {
        let engine = engine();
        let amounts = vec!["5:XYZ".parse().unwrap()];

        let result = sum_converted(&engine, &amounts, "EUR").await;

        assert!(matches!(result, Err(FxError::UnknownCurrency(code)) if code == "XYZ"));
    }

    #[tokio::test]
    async fn test_sum_bad_target() {
        let engine = engine();
        let result = sum_converted(&engine, &[], "euro").await;
        assert!(matches!(result, Err(FxError::UnknownCurrency(_))));
    }
}
