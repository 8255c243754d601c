//! FX engine error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the FX engine.
///
/// Cloneable so that one refresh result can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// Currency code is not present in the active snapshot.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    /// Amount cannot be converted (NaN or infinite).
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    /// A snapshot rate cannot be used as a divisor.
    #[error("Invalid rate {rate} for {currency}")]
    InvalidRate { currency: String, rate: f64 },

    /// Provider could not be reached.
    #[error("Rate provider transport error: {0}")]
    ProviderTransport(String),

    /// Provider did not answer within the fetch timeout.
    #[error("Rate provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// Provider answered with a non-200 status.
    #[error("Rate provider returned status {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    /// Provider answered 200 but flagged the request as unsuccessful.
    #[error("Rate provider rejected request: {body}")]
    ProviderRejected { body: String },

    /// Provider payload could not be decoded.
    #[error("Rate provider returned malformed payload: {0}")]
    ProviderFormat(String),

    /// More than one cached-rates record exists.
    #[error("Rate store corrupted: expected at most one record, found {records}")]
    StoreCorrupted { records: usize },

    /// Insert or replace did not match the records present.
    #[error("Rate store conflict: {0}")]
    StoreConflict(String),

    /// Underlying storage failure.
    #[error("Rate store error: {0}")]
    Store(String),
}

/// Broad classification used when mapping errors to API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from the caller.
    ClientInput,
    /// The upstream rate provider failed.
    Upstream,
    /// Storage or invariant failure inside the service.
    Internal,
}

impl FxError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FxError::ProviderTransport(_) | FxError::ProviderTimeout(_) => true,
            FxError::ProviderStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Classify the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            FxError::UnknownCurrency(_) | FxError::InvalidAmount(_) => ErrorClass::ClientInput,
            FxError::ProviderTransport(_)
            | FxError::ProviderTimeout(_)
            | FxError::ProviderStatus { .. }
            | FxError::ProviderRejected { .. }
            | FxError::ProviderFormat(_) => ErrorClass::Upstream,
            FxError::InvalidRate { .. }
            | FxError::StoreCorrupted { .. }
            | FxError::StoreConflict(_)
            | FxError::Store(_) => ErrorClass::Internal,
        }
    }

    /// HTTP status an API boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            FxError::UnknownCurrency(_) | FxError::InvalidAmount(_) => 400,
            FxError::ProviderTimeout(_) => 504,
            FxError::ProviderTransport(_) => 503,
            FxError::ProviderStatus { .. }
            | FxError::ProviderRejected { .. }
            | FxError::ProviderFormat(_) => 502,
            FxError::InvalidRate { .. }
            | FxError::StoreCorrupted { .. }
            | FxError::StoreConflict(_)
            | FxError::Store(_) => 500,
        }
    }

    /// Get error code for logs and API payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            FxError::InvalidAmount(_) => "INVALID_AMOUNT",
            FxError::InvalidRate { .. } => "INVALID_RATE",
            FxError::ProviderTransport(_) => "PROVIDER_TRANSPORT",
            FxError::ProviderTimeout(_) => "PROVIDER_TIMEOUT",
            FxError::ProviderStatus { .. } => "PROVIDER_STATUS",
            FxError::ProviderRejected { .. } => "PROVIDER_REJECTED",
            FxError::ProviderFormat(_) => "PROVIDER_FORMAT",
            FxError::StoreCorrupted { .. } => "STORE_CORRUPTED",
            FxError::StoreConflict(_) => "STORE_CONFLICT",
            FxError::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether operators must be alerted.
    pub fn is_alert_worthy(&self) -> bool {
        matches!(self, FxError::StoreCorrupted { .. })
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
