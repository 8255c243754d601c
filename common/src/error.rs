//! Error types for shared Pocketbook types.

use thiserror::Error;

/// Errors raised while constructing common value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Currency code is not three ASCII letters.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;
