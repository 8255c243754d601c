//! Engine and provider configuration.

use std::time::Duration;

use pocketbook_common::CurrencyCode;

/// What to do when a stale snapshot cannot be refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleFallback {
    /// Propagate the provider error; the stale record is neither served nor touched.
    #[default]
    FailClosed,
    /// Serve the stale snapshot and log a warning. The record is not rewritten.
    ///
    /// A failed refresh costs up to `fetch_timeout`. After one, the stale
    /// snapshot is served from memory for `stale_retry_interval` before the
    /// provider is tried again.
    ServeStale,
}

impl StaleFallback {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail-closed" | "fail_closed" | "closed" => Some(StaleFallback::FailClosed),
            "serve-stale" | "serve_stale" | "stale" => Some(StaleFallback::ServeStale),
            _ => None,
        }
    }
}

/// Configuration for the rate cache engine.
#[derive(Debug, Clone)]
pub struct FxEngineConfig {
    /// Currency every cached rate is relative to.
    pub base_currency: CurrencyCode,
    /// Maximum age of a snapshot before it must be refreshed.
    pub cache_ttl: Duration,
    /// Upper bound on one refresh fetch, retries included.
    pub fetch_timeout: Duration,
    /// Policy when refreshing a stale snapshot fails.
    pub stale_fallback: StaleFallback,
    /// Under [`StaleFallback::ServeStale`], how long to serve the stale
    /// snapshot after a failed refresh before trying the provider again.
    pub stale_retry_interval: Duration,
}

impl Default for FxEngineConfig {
    fn default() -> Self {
        Self {
            base_currency: CurrencyCode::eur(),
            cache_ttl: Duration::from_secs(60 * 60),
            fetch_timeout: Duration::from_secs(8),
            stale_fallback: StaleFallback::FailClosed,
            stale_retry_interval: Duration::from_secs(30),
        }
    }
}

impl FxEngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(base) = std::env::var("FX_BASE_CURRENCY") {
            config.base_currency = CurrencyCode::parse(&base).map_err(|e| e.to_string())?;
        }

        if let Some(secs) = parse_env_u64("FX_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_env_u64("FX_FETCH_TIMEOUT_MS")? {
            config.fetch_timeout = Duration::from_millis(ms);
        }

        if let Ok(policy) = std::env::var("FX_STALE_FALLBACK") {
            config.stale_fallback = StaleFallback::parse(&policy)
                .ok_or_else(|| format!("FX_STALE_FALLBACK: unknown policy {policy:?}"))?;
        }

        if let Some(secs) = parse_env_u64("FX_STALE_RETRY_SECS")? {
            config.stale_retry_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl.is_zero() {
            return Err("Cache TTL cannot be zero".to_string());
        }

        if self.fetch_timeout.is_zero() {
            return Err("Fetch timeout cannot be zero".to_string());
        }

        Ok(())
    }
}

/// Retry behaviour at the provider-call boundary.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Configuration for the HTTP rate provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider API root, e.g. `https://api.exchangeratesapi.io/v1`.
    pub base_url: String,
    /// Access key sent as the `access_key` query parameter.
    pub access_key: String,
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
    /// Retry policy.
    pub retry: RetryPolicy,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.exchangeratesapi.io/v1".to_string(),
            access_key: String::new(),
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("FX_PROVIDER_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var("FX_ACCESS_KEY") {
            config.access_key = key;
        }

        if let Some(ms) = parse_env_u64("FX_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        if let Some(attempts) = parse_env_u64("FX_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = u32::try_from(attempts)
                .map_err(|_| "FX_RETRY_ATTEMPTS: value too large".to_string())?;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("Provider URL must start with http:// or https://".to_string());
        }

        if self.access_key.trim().is_empty() {
            return Err("Provider access key cannot be empty".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be zero".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Retry attempts must be at least 1".to_string());
        }

        Ok(())
    }

    /// Check that one request fits inside the engine's fetch deadline.
    pub fn validate_against(&self, engine: &FxEngineConfig) -> Result<(), String> {
        if self.request_timeout > engine.fetch_timeout {
            return Err(format!(
                "Request timeout {:?} exceeds fetch timeout {:?}",
                self.request_timeout, engine.fetch_timeout
            ));
        }
        Ok(())
    }
}

fn parse_env_u64(var: &str) -> Result<Option<u64>, String> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("{var}: expected an unsigned integer, got {value:?}")),
        Err(_) => Ok(None),
    }
}
