//! The rate cache engine.
//!
//! Every operation that needs rates goes through [`RateCacheEngine::ensure_rates`]:
//!
//! 1. A fresh in-memory snapshot answers immediately, without I/O.
//! 2. Otherwise the caller joins the single in-flight refresh, starting it if
//!    none is running. The refresh loads the store, classifies it as
//!    [`CacheState`], and performs one transition:
//!    - `Empty`: fetch, upsert under the singleton id.
//!    - `Stale`: fetch, upsert under the existing id.
//!    - `Fresh`: nothing to write.
//! 3. Every caller that joined the refresh receives the same result, success
//!    or error.
//!
//! A failed refresh writes nothing, so an empty store stays empty and a
//! stale record stays as it was.
//!
//! The refresh slot only holds a weak handle. When every caller waiting on a
//! refresh is dropped, the refresh and its provider call are dropped too, and
//! the next caller starts over.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::{Mutex, RwLock};
use pocketbook_common::{from_std, Clock, CurrencyCode, SystemClock, Timestamp};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::CacheState;
use crate::config::{FxEngineConfig, StaleFallback};
use crate::conversion::convert_with_rates;
use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;
use crate::snapshot::{CachedRates, RateTable};
use crate::store::RateStore;

type RefreshOutput = BoxFuture<'static, FxResult<Arc<CachedRates>>>;
type RefreshFuture = Shared<RefreshOutput>;

struct InflightRefresh {
    id: u64,
    future: WeakShared<RefreshOutput>,
}

/// Stale snapshot served after a failed refresh, until `retry_at`.
struct DegradedSnapshot {
    snapshot: Arc<CachedRates>,
    retry_at: Timestamp,
}

enum Join {
    /// The snapshot became fresh while waiting for the refresh slot.
    Ready(Arc<CachedRates>),
    /// Await this refresh, then release slot `id`.
    Wait(u64, RefreshFuture),
}

struct EngineInner {
    provider: Arc<dyn RateProvider>,
    store: Arc<dyn RateStore>,
    clock: Arc<dyn Clock>,
    config: FxEngineConfig,
    /// Last snapshot persisted or loaded by this engine.
    snapshot: RwLock<Option<Arc<CachedRates>>>,
    degraded: RwLock<Option<DegradedSnapshot>>,
    inflight: Mutex<Option<InflightRefresh>>,
    next_refresh_id: AtomicU64,
}

/// What operators see about the persisted cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStatus {
    /// `empty`, `fresh` or `stale`.
    pub state: &'static str,
    pub base_currency: Option<CurrencyCode>,
    pub updated_at: Option<Timestamp>,
    pub age: Option<chrono::Duration>,
    pub currencies: usize,
    pub ttl: Duration,
}

/// Exchange-rate cache and conversion engine.
///
/// Construct once at startup and share by cloning; clones share one cache
/// and one refresh slot.
#[derive(Clone)]
pub struct RateCacheEngine {
    inner: Arc<EngineInner>,
}

impl RateCacheEngine {
    /// Create a new engine using the wall clock.
    pub fn new(
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn RateStore>,
        config: FxEngineConfig,
    ) -> Self {
        Self::with_clock(provider, store, Arc::new(SystemClock), config)
    }

    /// Create a new engine with an explicit clock.
    pub fn with_clock(
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn RateStore>,
        clock: Arc<dyn Clock>,
        config: FxEngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                provider,
                store,
                clock,
                config,
                snapshot: RwLock::new(None),
                degraded: RwLock::new(None),
                inflight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &FxEngineConfig {
        &self.inner.config
    }

    /// Get the rate for `code`: units of `code` per one unit of base.
    #[instrument(skip(self))]
    pub async fn get_rate(&self, code: &str) -> FxResult<f64> {
        let rates = self.ensure_rates().await?;
        lookup(&rates, code)
    }

    /// Convert `amount` from one currency to another.
    ///
    /// Zero converts to zero without touching the provider or store. The
    /// result is not rounded.
    #[instrument(skip(self))]
    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> FxResult<f64> {
        if amount == 0.0 {
            return Ok(0.0);
        }
        if !amount.is_finite() {
            return Err(FxError::InvalidAmount(amount));
        }

        // Both rates come from one snapshot.
        let rates = self.ensure_rates().await?;
        let from_rate = lookup(&rates, from)?;
        let to_rate = lookup(&rates, to)?;
        convert_with_rates(amount, (from, from_rate), (to, to_rate))
    }

    /// Currency codes in the active snapshot, sorted.
    #[instrument(skip(self))]
    pub async fn list_currencies(&self) -> FxResult<Vec<String>> {
        let rates = self.ensure_rates().await?;
        Ok(rates.currencies())
    }

    /// Alias of [`RateCacheEngine::list_currencies`] used by request handlers.
    pub async fn get_supported_currencies(&self) -> FxResult<Vec<String>> {
        self.list_currencies().await
    }

    /// Ask the provider which codes it supports. Not cached.
    #[instrument(skip(self))]
    pub async fn provider_currencies(&self) -> FxResult<BTreeSet<String>> {
        let timeout = self.inner.config.fetch_timeout;
        tokio::time::timeout(timeout, self.inner.provider.fetch_supported_currencies())
            .await
            .unwrap_or(Err(FxError::ProviderTimeout(timeout)))
    }

    /// Describe the persisted cache without refreshing it.
    pub async fn snapshot_status(&self) -> FxResult<SnapshotStatus> {
        let record = self.inner.store.load().await?;
        let now = self.inner.clock.now();
        let ttl = self.inner.config.cache_ttl;
        let state = CacheState::evaluate(record, now, ttl);

        let record = state.record();
        Ok(SnapshotStatus {
            state: state.name(),
            base_currency: record.map(|r| r.base_currency.clone()),
            updated_at: record.map(|r| r.updated_at),
            age: record.map(|r| r.age(now)),
            currencies: record.map_or(0, |r| r.rates.len()),
            ttl,
        })
    }

    /// Forget the in-memory snapshot so the next call re-reads the store.
    ///
    /// The persisted record is left alone.
    pub fn invalidate(&self) {
        *self.inner.snapshot.write() = None;
        *self.inner.degraded.write() = None;
        debug!("In-memory rate snapshot invalidated");
    }

    /// Return a fresh snapshot, refreshing it if needed.
    pub async fn ensure_rates(&self) -> FxResult<Arc<CachedRates>> {
        if let Some(rates) = self.inner.fresh_snapshot() {
            return Ok(rates);
        }

        let (id, refresh) = match self.inner.join_refresh() {
            Join::Ready(rates) => return Ok(rates),
            Join::Wait(id, refresh) => (id, refresh),
        };

        let result = refresh.await;
        self.inner.finish_refresh(id);
        result
    }
}

impl EngineInner {
    fn fresh_snapshot(&self) -> Option<Arc<CachedRates>> {
        let now = self.clock.now();
        if let Some(snapshot) = self.snapshot.read().clone() {
            if snapshot.base_currency == self.config.base_currency
                && !snapshot.is_stale(now, self.config.cache_ttl)
            {
                return Some(snapshot);
            }
        }

        self.degraded
            .read()
            .as_ref()
            .filter(|d| now < d.retry_at)
            .map(|d| Arc::clone(&d.snapshot))
    }

    /// Join the in-flight refresh or start one.
    fn join_refresh(self: &Arc<Self>) -> Join {
        let mut slot = self.inflight.lock();

        if let Some(inflight) = slot.as_ref() {
            match inflight.future.upgrade() {
                Some(future) => return Join::Wait(inflight.id, future),
                None => debug!(id = inflight.id, "Abandoned rate refresh discarded"),
            }
        }

        if let Some(rates) = self.fresh_snapshot() {
            return Join::Ready(rates);
        }

        let id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        let future = Self::refresh(Arc::clone(self)).boxed().shared();
        *slot = future
            .downgrade()
            .map(|weak| InflightRefresh { id, future: weak });
        Join::Wait(id, future)
    }

    fn finish_refresh(&self, id: u64) {
        let mut slot = self.inflight.lock();
        if slot.as_ref().is_some_and(|inflight| inflight.id == id) {
            *slot = None;
        }
    }

    async fn refresh(self: Arc<Self>) -> FxResult<Arc<CachedRates>> {
        let record = self.store.load().await.map_err(|e| {
            if e.is_alert_worthy() {
                error!(error = %e, code = e.error_code(), "Rate store invariant violated");
            }
            e
        })?;

        let state = self.classify(record);
        debug!(state = state.name(), "Evaluated rate cache");

        // Rates are as old as the request that fetched them.
        let requested_at = self.clock.now();

        let rates = match state {
            CacheState::Fresh(rates) => rates,
            CacheState::Empty => {
                let fetched = self.fetch().await?;
                let rates = CachedRates::new(self.config.base_currency.clone(), fetched, requested_at);
                self.store.upsert(&rates).await?;
                info!(
                    id = %rates.id,
                    currencies = rates.rates.len(),
                    "Created rate cache"
                );
                rates
            }
            CacheState::Stale(stale) => match self.fetch().await {
                Ok(fetched) => {
                    let rates = CachedRates {
                        base_currency: self.config.base_currency.clone(),
                        ..stale.refreshed(fetched, requested_at)
                    };
                    self.store.upsert(&rates).await?;
                    info!(
                        id = %rates.id,
                        previous_update = %stale.updated_at,
                        currencies = rates.rates.len(),
                        "Refreshed stale rate cache"
                    );
                    rates
                }
                Err(e)
                    if self.config.stale_fallback == StaleFallback::ServeStale
                        && stale.base_currency == self.config.base_currency =>
                {
                    let retry_at = self
                        .clock
                        .now()
                        .checked_add_signed(from_std(self.config.stale_retry_interval))
                        .unwrap_or(Timestamp::MAX_UTC);
                    warn!(
                        error = %e,
                        updated_at = %stale.updated_at,
                        retry_at = %retry_at,
                        "Rate refresh failed, serving stale snapshot"
                    );
                    let stale = Arc::new(stale);
                    *self.degraded.write() = Some(DegradedSnapshot {
                        snapshot: Arc::clone(&stale),
                        retry_at,
                    });
                    return Ok(stale);
                }
                Err(e) => return Err(e),
            },
        };

        let rates = Arc::new(rates);
        *self.snapshot.write() = Some(Arc::clone(&rates));
        *self.degraded.write() = None;
        Ok(rates)
    }

    /// A record for another base currency is treated as stale.
    fn classify(&self, record: Option<CachedRates>) -> CacheState {
        match CacheState::evaluate(record, self.clock.now(), self.config.cache_ttl) {
            CacheState::Fresh(rates) if rates.base_currency != self.config.base_currency => {
                warn!(
                    stored = %rates.base_currency,
                    configured = %self.config.base_currency,
                    "Cached rates use a different base currency"
                );
                CacheState::Stale(rates)
            }
            state => state,
        }
    }

    async fn fetch(&self) -> FxResult<RateTable> {
        let base = &self.config.base_currency;
        let timeout = self.config.fetch_timeout;

        let mut rates = match tokio::time::timeout(timeout, self.provider.fetch_rates(base)).await {
            Ok(result) => result,
            Err(_) => Err(FxError::ProviderTimeout(timeout)),
        }
        .map_err(|e| {
            warn!(provider = self.provider.name(), error = %e, "Rate fetch failed");
            e
        })?;

        // The base quotes itself at 1 even when the provider omits it.
        rates.entry(base.code().to_string()).or_insert(1.0);
        Ok(rates)
    }
}

fn lookup(rates: &CachedRates, code: &str) -> FxResult<f64> {
    let normalized = code.trim().to_ascii_uppercase();
    rates
        .rate(&normalized)
        .ok_or_else(|| FxError::UnknownCurrency(code.to_string()))
}
