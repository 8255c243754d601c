//! Persistence for the cached-rates record.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{FxError, FxResult};
use crate::snapshot::CachedRates;

/// Store holding at most one [`CachedRates`] record.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Load the record. More than one record is reported as
    /// [`FxError::StoreCorrupted`], never resolved silently.
    async fn load(&self) -> FxResult<Option<CachedRates>>;

    /// Insert the first record. Fails if any record exists.
    async fn insert(&self, rates: &CachedRates) -> FxResult<()>;

    /// Replace the record whose id is `rates.id`. Fails if it does not exist.
    async fn replace(&self, rates: &CachedRates) -> FxResult<()>;

    /// Atomically replace the record with `rates.id`, or insert it.
    async fn upsert(&self, rates: &CachedRates) -> FxResult<()>;
}

/// Counters kept by [`InMemoryRateStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub loads: usize,
    pub inserts: usize,
    pub replaces: usize,
}

/// Process-local store.
///
/// Used when no database is configured, and as the test double for the
/// engine.
#[derive(Default)]
pub struct InMemoryRateStore {
    records: RwLock<Vec<CachedRates>>,
    loads: AtomicUsize,
    inserts: AtomicUsize,
    replaces: AtomicUsize,
}

impl InMemoryRateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `records`.
    ///
    /// Passing more than one record produces a corrupted store.
    pub fn with_records(records: Vec<CachedRates>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Copy of every record currently held.
    pub async fn records(&self) -> Vec<CachedRates> {
        self.records.read().await.clone()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            loads: self.loads.load(Ordering::SeqCst),
            inserts: self.inserts.load(Ordering::SeqCst),
            replaces: self.replaces.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn load(&self) -> FxResult<Option<CachedRates>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let records = self.records.read().await;
        match records.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.clone())),
            many => Err(FxError::StoreCorrupted { records: many.len() }),
        }
    }

    async fn insert(&self, rates: &CachedRates) -> FxResult<()> {
        let mut records = self.records.write().await;
        if !records.is_empty() {
            return Err(FxError::StoreConflict(format!(
                "insert of {} with {} record(s) present",
                rates.id,
                records.len()
            )));
        }
        records.push(rates.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        debug!(id = %rates.id, "Inserted cached rates");
        Ok(())
    }

    async fn replace(&self, rates: &CachedRates) -> FxResult<()> {
        let mut records = self.records.write().await;
        let existing = records
            .iter_mut()
            .find(|r| r.id == rates.id)
            .ok_or_else(|| FxError::StoreConflict(format!("no record with id {}", rates.id)))?;
        *existing = rates.clone();
        self.replaces.fetch_add(1, Ordering::SeqCst);
        debug!(id = %rates.id, "Replaced cached rates");
        Ok(())
    }

    async fn upsert(&self, rates: &CachedRates) -> FxResult<()> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == rates.id) {
            Some(existing) => {
                *existing = rates.clone();
                self.replaces.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                records.push(rates.clone());
                self.inserts.fetch_add(1, Ordering::SeqCst);
            }
        }
        debug!(id = %rates.id, "Upserted cached rates");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::snapshot_at;
    use pocketbook_common::{now, RateSnapshotId};

    #[tokio::test]
    async fn test_empty_store_loads_none() {
        let store = InMemoryRateStore::new();
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.stats().loads, 1);
    }

    #[tokio::test]
    async fn test_insert_then_load() {
        let store = InMemoryRateStore::new();
        let snapshot = snapshot_at(now());

        tokio_test::assert_ok!(store.insert(&snapshot).await);

        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_insert_refuses_second_record() {
        let store = InMemoryRateStore::with_records(vec![snapshot_at(now())]);
        let other = CachedRates {
            id: RateSnapshotId::new(),
            ..snapshot_at(now())
        };

        let result = store.insert(&other).await;

        assert!(matches!(result, Err(FxError::StoreConflict(_))));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_replace_targets_id() {
        let original = snapshot_at(now() - chrono::Duration::hours(3));
        let store = InMemoryRateStore::with_records(vec![original.clone()]);
        let refreshed = original.refreshed(original.rates.clone(), now());

        store.replace(&refreshed).await.unwrap();

        assert_eq!(store.records().await, vec![refreshed]);
        assert_eq!(store.stats().replaces, 1);
    }

    #[tokio::test]
    async fn test_replace_missing_record_fails() {
        let store = InMemoryRateStore::new();
        let result = store.replace(&snapshot_at(now())).await;
        assert!(matches!(result, Err(FxError::StoreConflict(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_replaces() {
        let store = InMemoryRateStore::new();
        let first = snapshot_at(now() - chrono::Duration::hours(2));

        store.upsert(&first).await.unwrap();
        store.upsert(&first.refreshed(first.rates.clone(), now())).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.stats(),
            StoreStats {
                loads: 0,
                inserts: 1,
                replaces: 1
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_records_are_corruption() {
        let store = InMemoryRateStore::with_records(vec![
            snapshot_at(now()),
            CachedRates {
                id: RateSnapshotId::new(),
                ..snapshot_at(now())
            },
        ]);

        let result = store.load().await;

        assert!(matches!(result, Err(FxError::StoreCorrupted { records: 2 })));
        assert_eq!(store.len().await, 2);
    }
}
