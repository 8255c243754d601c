//! The persisted exchange-rate snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use pocketbook_common::{from_std, CurrencyCode, RateSnapshotId, Timestamp};
use serde::{Deserialize, Serialize};

/// Rates keyed by currency code: units of that currency per one unit of base.
pub type RateTable = BTreeMap<String, f64>;

/// Snapshot of provider rates, stored as a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRates {
    /// Identifier of the record.
    pub id: RateSnapshotId,
    /// Currency all rates are relative to.
    pub base_currency: CurrencyCode,
    /// Units of each currency per one unit of `base_currency`.
    pub rates: RateTable,
    /// Time of the last successful provider fetch.
    pub updated_at: Timestamp,
}

impl CachedRates {
    /// Build the first snapshot, under the singleton identifier.
    pub fn new(base_currency: CurrencyCode, rates: RateTable, updated_at: Timestamp) -> Self {
        Self {
            id: RateSnapshotId::singleton(),
            base_currency,
            rates,
            updated_at,
        }
    }

    /// The same record with new rates, keeping its identifier.
    pub fn refreshed(&self, rates: RateTable, updated_at: Timestamp) -> Self {
        Self {
            id: self.id,
            base_currency: self.base_currency.clone(),
            rates,
            updated_at,
        }
    }

    /// Age of the snapshot at `now`. Clock skew into the future counts as zero.
    pub fn age(&self, now: Timestamp) -> chrono::Duration {
        (now - self.updated_at).max(chrono::Duration::zero())
    }

    /// Whether the snapshot is older than `ttl` at `now`.
    pub fn is_stale(&self, now: Timestamp, ttl: Duration) -> bool {
        self.age(now) > from_std(ttl)
    }

    /// Look up a rate.
    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(code).copied()
    }

    /// Currency codes in the snapshot, sorted.
    pub fn currencies(&self) -> Vec<String> {
        self.rates.keys().cloned().collect()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pocketbook_common::now;

    #[test]
    fn test_new_uses_singleton_id() {
        let snapshot = snapshot_at(now());
        assert!(snapshot.id.is_singleton());
    }

    #[test]
    fn test_refreshed_keeps_identity() {
        let original = CachedRates {
            id: RateSnapshotId::new(),
            ..snapshot_at(now() - chrono::Duration::hours(2))
        };
        let later = now();
        let rates = RateTable::from([("USD".to_string(), 1.2)]);

        let refreshed = original.refreshed(rates.clone(), later);

        assert_eq!(refreshed.id, original.id);
        assert_eq!(refreshed.base_currency, original.base_currency);
        assert_eq!(refreshed.rates, rates);
        assert_eq!(refreshed.updated_at, later);
    }

    #[test]
    fn test_staleness_boundary() {
        let start = now();
        let snapshot = snapshot_at(start);
        let ttl = Duration::from_secs(60);

        assert!(!snapshot.is_stale(start, ttl));
        assert!(!snapshot.is_stale(start + chrono::Duration::seconds(60), ttl));
        assert!(snapshot.is_stale(start + chrono::Duration::milliseconds(60_001), ttl));
    }

    #[test]
    fn test_future_timestamp_is_not_stale() {
        let start = now();
        let snapshot = snapshot_at(start + chrono::Duration::minutes(5));
        assert_eq!(snapshot.age(start), chrono::Duration::zero());
        assert!(!snapshot.is_stale(start, Duration::from_secs(1)));
    }

    #[test]
    fn test_currencies_are_sorted() {
        let snapshot = snapshot_at(now());
        assert_eq!(snapshot.currencies(), vec!["EUR", "GBP", "USD"]);
    }

    #[test]
    fn test_persisted_field_names() {
        let snapshot = snapshot_at(now());
        let value = serde_json::to_value(&snapshot).unwrap();
        let object = value.as_object().unwrap();
        for field in ["id", "base_currency", "rates", "updated_at"] {
            assert!(object.contains_key(field), "missing {field}");
        }
        let back: CachedRates = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }
}
