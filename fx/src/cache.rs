//! Cache freshness states for the rate snapshot.

use std::time::Duration;

use pocketbook_common::Timestamp;

use crate::snapshot::CachedRates;

/// Observed condition of the persisted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheState {
    /// No record exists.
    Empty,
    /// A record exists and is within its TTL.
    Fresh(CachedRates),
    /// A record exists and has outlived its TTL.
    Stale(CachedRates),
}

impl CacheState {
    /// Classify a loaded record at `now`.
    pub fn evaluate(record: Option<CachedRates>, now: Timestamp, ttl: Duration) -> Self {
        match record {
            None => CacheState::Empty,
            Some(rates) if rates.is_stale(now, ttl) => CacheState::Stale(rates),
            Some(rates) => CacheState::Fresh(rates),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Fresh(_) => "fresh",
            CacheState::Stale(_) => "stale",
        }
    }

    /// The record, if any.
    pub fn record(&self) -> Option<&CachedRates> {
        match self {
            CacheState::Empty => None,
            CacheState::Fresh(rates) | CacheState::Stale(rates) => Some(rates),
        }
    }
}
