//! HTTP client for the third-party rate API.
//!
//! The provider speaks the common "latest rates" contract:
//!
//! - `GET {base_url}/latest?access_key=KEY&base=EUR` answers
//!   `{"success": true, "base": "EUR", "rates": {"USD": 1.1, ...}}`
//! - `GET {base_url}/symbols?access_key=KEY` answers
//!   `{"success": true, "symbols": {"USD": "United States Dollar", ...}}`
//!
//! A non-200 status or `success != true` is a provider error; the raw body
//! is kept in the error for diagnostics.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use pocketbook_common::CurrencyCode;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ProviderConfig;
use crate::error::{FxError, FxResult};
use crate::provider::RateProvider;
use crate::snapshot::RateTable;

/// Bodies longer than this are truncated inside errors.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    rates: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct SymbolsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    symbols: HashMap<String, serde_json::Value>,
}

/// Rate provider backed by the HTTP API.
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
    access_key: String,
    request_timeout: Duration,
}

impl HttpRateProvider {
    /// Create a new HTTP provider.
    pub fn new(config: &ProviderConfig) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("pocketbook-fx/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FxError::ProviderTransport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
            request_timeout: config.request_timeout,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> FxResult<(T, String)> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(&[("access_key", self.access_key.as_str())])
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(path, status = status.as_u16(), bytes = body.len(), "Provider responded");

        if status != StatusCode::OK {
            return Err(FxError::ProviderStatus {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let parsed = serde_json::from_str::<T>(&body)
            .map_err(|e| FxError::ProviderFormat(format!("{e}; body: {}", truncate(&body))))?;
        Ok((parsed, body))
    }

    fn transport_error(&self, e: reqwest::Error) -> FxError {
        if e.is_timeout() {
            FxError::ProviderTimeout(self.request_timeout)
        } else if e.is_decode() {
            FxError::ProviderFormat(e.to_string())
        } else {
            FxError::ProviderTransport(e.to_string())
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(base = %base))]
    async fn fetch_rates(&self, base: &CurrencyCode) -> FxResult<RateTable> {
        let (response, body): (LatestResponse, _) =
            self.get("latest", &[("base", base.code())]).await?;

        if !response.success {
            return Err(FxError::ProviderRejected { body: truncate(&body) });
        }

        validate_rates(response.rates)
    }

    #[instrument(skip(self))]
    async fn fetch_supported_currencies(&self) -> FxResult<BTreeSet<String>> {
        let (response, body): (SymbolsResponse, _) = self.get("symbols", &[]).await?;

        if !response.success {
            return Err(FxError::ProviderRejected { body: truncate(&body) });
        }

        Ok(response
            .symbols
            .into_keys()
            .map(|code| code.to_ascii_uppercase())
            .collect())
    }
}

/// Normalize codes and reject rates that could not be divided by.
fn validate_rates(raw: HashMap<String, f64>) -> FxResult<RateTable> {
    if raw.is_empty() {
        return Err(FxError::ProviderFormat("response contained no rates".to_string()));
    }

    let mut rates = RateTable::new();
    for (code, rate) in raw {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(FxError::ProviderFormat(format!("rate {rate} for {code} is not positive")));
        }
        let normalized = code.to_ascii_uppercase();
        if rates.insert(normalized.clone(), rate).is_some() {
            return Err(FxError::ProviderFormat(format!(
                "currency {normalized} quoted more than once"
            )));
        }
    }
    Ok(rates)
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpRateProvider {
        let config = ProviderConfig {
            base_url: server.uri(),
            access_key: "test-key".to_string(),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        HttpRateProvider::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_rates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .and(query_param("access_key", "test-key"))
            .and(query_param("base", "EUR"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success": true, "base": "EUR", "rates": {"USD": 1.1, "EUR": 1.0, "gbp": 0.85}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let rates = provider_for(&server).fetch_rates(&CurrencyCode::eur()).await.unwrap();

        assert_eq!(rates.len(), 3);
        assert_eq!(rates.get("USD"), Some(&1.1));
        assert_eq!(rates.get("GBP"), Some(&0.85));
    }

    #[tokio::test]
    async fn test_non_200_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream maintenance"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_rates(&CurrencyCode::eur())
            .await
            .unwrap_err();

        match err {
            FxError::ProviderStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "upstream maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_false_is_rejected() {
        let server = MockServer::start().await;
        let body = r#"{"success": false, "error": {"code": 101, "type": "invalid_access_key"}}"#;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_rates(&CurrencyCode::eur())
            .await
            .unwrap_err();

        assert!(matches!(err, FxError::ProviderRejected { body: b } if b.contains("invalid_access_key")));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_rates(&CurrencyCode::eur())
            .await
            .unwrap_err();

        assert!(matches!(err, FxError::ProviderFormat(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_rate_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success": true, "rates": {"USD": 0.0}}"#),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_rates(&CurrencyCode::eur())
            .await
            .unwrap_err();

        assert!(matches!(err, FxError::ProviderFormat(_)));
    }

    #[tokio::test]
    async fn test_codes_differing_only_in_case_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success": true, "rates": {"usd": 1.1, "USD": 1.2, "GBP": 0.85}}"#),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_rates(&CurrencyCode::eur())
            .await
            .unwrap_err();

        assert!(matches!(err, FxError::ProviderFormat(ref msg) if msg.contains("USD")));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"success": true, "rates": {"USD": 1.1}}"#)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_rates(&CurrencyCode::eur())
            .await
            .unwrap_err();

        assert!(matches!(err, FxError::ProviderTimeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_supported_currencies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/symbols"))
            .and(query_param("access_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"success": true, "symbols": {"USD": "United States Dollar", "JPY": "Japanese Yen"}}"#,
            ))
            .mount(&server)
            .await;

        let codes = provider_for(&server).fetch_supported_currencies().await.unwrap();

        assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec!["JPY", "USD"]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let truncated = truncate(&long);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= MAX_ERROR_BODY + 3);
    }
}
