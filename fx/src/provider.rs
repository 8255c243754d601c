//! Rate provider traits and implementations.

use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use pocketbook_common::CurrencyCode;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::FxResult;
use crate::snapshot::RateTable;

/// Trait for FX rate providers.
///
/// One call is one network round trip; retries belong to
/// [`RetryingRateProvider`].
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch current rates relative to `base`.
    async fn fetch_rates(&self, base: &CurrencyCode) -> FxResult<RateTable>;

    /// Fetch the codes the provider can quote.
    async fn fetch_supported_currencies(&self) -> FxResult<BTreeSet<String>>;
}

/// Wraps a provider with bounded, jittered exponential backoff.
pub struct RetryingRateProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: RateProvider> RetryingRateProvider<P> {
    /// Create a new retrying provider.
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Get the wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    async fn backoff(&self, retry: u32) {
        let delay = self.policy.delay_for(retry);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        let delay = delay.mul_f64(1.0 + jitter).min(self.policy.max_delay);
        tokio::time::sleep(delay).await;
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> FxResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = FxResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(
                        provider = self.inner.name(),
                        operation,
                        attempt,
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(
                        provider = self.inner.name(),
                        operation,
                        attempt,
                        error = %e,
                        "Provider call failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<P: RateProvider> RateProvider for RetryingRateProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_rates(&self, base: &CurrencyCode) -> FxResult<RateTable> {
        self.run("fetch_rates", || self.inner.fetch_rates(base)).await
    }

    async fn fetch_supported_currencies(&self) -> FxResult<BTreeSet<String>> {
        self.run("fetch_supported_currencies", || self.inner.fetch_supported_currencies())
            .await
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRateProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use crate::error::FxError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock rate provider for testing.
    ///
    /// Counts fetches and can be told to fail or to answer slowly.
    pub struct MockRateProvider {
        name: String,
        rates: Mutex<RateTable>,
        fetches: AtomicUsize,
        failure: Mutex<Option<FxError>>,
        transient_failures: AtomicUsize,
        latency: Mutex<Duration>,
    }

    impl MockRateProvider {
        /// Create a new mock provider quoting `rates`.
        pub fn new(name: impl Into<String>, rates: RateTable) -> Self {
            Self {
                name: name.into(),
                rates: Mutex::new(rates),
                fetches: AtomicUsize::new(0),
                failure: Mutex::new(None),
                transient_failures: AtomicUsize::new(0),
                latency: Mutex::new(Duration::ZERO),
            }
        }

        /// Replace the quoted rates.
        pub fn set_rates(&self, rates: RateTable) {
            *self.rates.lock() = rates;
        }

        /// Fail every call with `error` until cleared.
        pub fn fail_with(&self, error: FxError) {
            *self.failure.lock() = Some(error);
        }

        /// Stop failing.
        pub fn recover(&self) {
            *self.failure.lock() = None;
        }

        /// Fail the next `n` calls with a transport error.
        pub fn fail_next(&self, n: usize) {
            self.transient_failures.store(n, Ordering::SeqCst);
        }

        /// Delay every answer.
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock() = latency;
        }

        /// Number of calls made so far, of either kind.
        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        async fn answer(&self) -> FxResult<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);

            let latency = *self.latency.lock();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if let Some(error) = self.failure.lock().clone() {
                return Err(error);
            }

            let pending = self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if pending.is_ok() {
                return Err(FxError::ProviderTransport("injected failure".to_string()));
            }

            Ok(())
        }
    }

    #[async_trait]
    impl RateProvider for MockRateProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_rates(&self, _base: &CurrencyCode) -> FxResult<RateTable> {
            self.answer().await?;
            Ok(self.rates.lock().clone())
        }

        async fn fetch_supported_currencies(&self) -> FxResult<BTreeSet<String>> {
            self.answer().await?;
            Ok(self.rates.lock().keys().cloned().collect())
        }
    }
}
