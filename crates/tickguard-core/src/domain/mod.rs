//! # Domain Models
//!
//! Canonical value types shared by adapters, the validator and the engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Validated, upper-cased ticker |
//! | [`UtcDateTime`] | RFC3339 UTC timestamp |
//! | [`RawQuote`] | Unvalidated adapter output (all fields optional) |
//! | [`Quote`] | Validator-accepted reading |
//! | [`AssetClass`] | Instrument class used for plausibility bounds |

mod models;
mod symbol;
mod timestamp;

pub use models::{validate_currency_code, AssetClass, Quote, RawQuote};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
