//! Pocketbook FX Engine
//!
//! Exchange-rate cache and conversion engine for the Pocketbook service.
//!
//! # Features
//!
//! - One persisted snapshot of provider rates, relative to a fixed base currency
//! - Lazy TTL refresh, coalesced so concurrent callers share one provider fetch
//! - Atomic upsert of the snapshot, never more than one record
//! - Full-precision conversion; rounding happens once, on totals
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pocketbook_fx::{FxEngineConfig, HttpRateProvider, InMemoryRateStore, ProviderConfig, RateCacheEngine};
//!
//! let provider = Arc::new(HttpRateProvider::new(&ProviderConfig::from_env()?)?);
//! let store = Arc::new(InMemoryRateStore::new());
//! let engine = RateCacheEngine::new(provider, store, FxEngineConfig::default());
//!
//! let eur = engine.convert(100.0, "USD", "EUR").await?;
//! let codes = engine.list_currencies().await?;
//! ```

pub mod cache;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod http_provider;
pub mod pg_store;
pub mod provider;
pub mod snapshot;
pub mod store;

pub use cache::CacheState;
pub use config::{FxEngineConfig, ProviderConfig, RetryPolicy, StaleFallback};
pub use conversion::ConvertedTotal;
pub use engine::{RateCacheEngine, SnapshotStatus};
pub use error::{ErrorClass, FxError, FxResult};
pub use http_provider::HttpRateProvider;
pub use pg_store::PgRateStore;
pub use provider::{RateProvider, RetryingRateProvider};
pub use snapshot::{CachedRates, RateTable};
pub use store::{InMemoryRateStore, RateStore, StoreStats};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
