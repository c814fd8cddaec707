use std::time::Duration;

use thiserror::Error;

use crate::engine::AttemptRecord;
use crate::ProviderId;

/// Validation and contract errors for domain types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter or '^': '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid source '{value}', expected one of yahoo, alphavantage, finnhub")]
    InvalidSource { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("currency must be a 3-letter ISO code: '{value}'")]
    InvalidCurrency { value: String },
}

/// Startup configuration errors. These are the only fatal errors the engine produces.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("adapter priority order must list at least one source")]
    EmptyPriorityOrder,

    #[error("source '{0}' appears more than once in the adapter priority order")]
    DuplicateSource(ProviderId),

    #[error("source '{0}' is listed in the priority order but no adapter is registered for it")]
    AdapterNotRegistered(ProviderId),

    #[error("configuration value '{field}' must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal outcome of a quote lookup that produced no usable price.
#[derive(Debug, Error, Clone)]
pub enum QuoteError {
    #[error(transparent)]
    InvalidSymbol(#[from] ValidationError),

    #[error("no data available for '{symbol}': every source failed and the cache is empty")]
    DataUnavailable {
        symbol: String,
        attempts: Vec<AttemptRecord>,
    },

    #[error("quote lookup for '{symbol}' timed out after {after:?}")]
    Timeout { symbol: String, after: Duration },
}

impl QuoteError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidSymbol(_) => "quote.invalid_symbol",
            Self::DataUnavailable { .. } => "quote.data_unavailable",
            Self::Timeout { .. } => "quote.timeout",
        }
    }

    /// Attempts made before giving up; empty for errors raised before routing started.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::DataUnavailable { attempts, .. } => attempts,
            Self::InvalidSymbol(_) | Self::Timeout { .. } => &[],
        }
    }
}
