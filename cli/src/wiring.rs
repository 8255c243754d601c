//! Build a [`RateCacheEngine`] from the environment.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use pocketbook_fx::{
    FxEngineConfig, HttpRateProvider, InMemoryRateStore, PgRateStore, ProviderConfig,
    RateCacheEngine, RateProvider, RateStore, RetryingRateProvider,
};
use tracing::{info, warn};

pub async fn build_engine() -> anyhow::Result<RateCacheEngine> {
    let engine_config = FxEngineConfig::from_env().map_err(|e| anyhow!(e))?;
    engine_config
        .validate()
        .map_err(|e| anyhow!("Invalid engine configuration: {}", e))?;

    let provider_config = ProviderConfig::from_env().map_err(|e| anyhow!(e))?;
    provider_config
        .validate()
        .and_then(|()| provider_config.validate_against(&engine_config))
        .map_err(|e| anyhow!("Invalid provider configuration: {}", e))?;

    info!(
        base_currency = %engine_config.base_currency,
        ttl_secs = engine_config.cache_ttl.as_secs(),
        provider = %provider_config.base_url,
        "Rate cache configured"
    );

    let http = HttpRateProvider::new(&provider_config)?;
    let provider: Arc<dyn RateProvider> =
        Arc::new(RetryingRateProvider::new(http, provider_config.retry.clone()));

    let store: Arc<dyn RateStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PgRateStore::connect(&url)
                .await
                .context("Failed to connect to DATABASE_URL")?;
            store.migrate().await?;
            Arc::new(store)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, cached rates will not outlive this process");
            Arc::new(InMemoryRateStore::new())
        }
    };

    Ok(RateCacheEngine::new(provider, store, engine_config))
}
