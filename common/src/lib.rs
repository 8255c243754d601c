//! Pocketbook Common Types
//!
//! Shared types used by the exchange-rate engine and its consumers:
//! currency codes, snapshot identifiers, and clock utilities.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
