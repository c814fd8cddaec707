use serde::{Deserialize, Serialize};

use crate::{ProviderId, Symbol, UtcDateTime, ValidationError};

/// Canonical instrument class, used to key price plausibility bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Etf,
    Index,
    Crypto,
    Forex,
    Fund,
    Other,
}

/// Unvalidated reading produced by a source adapter.
///
/// Every field except `source` may be missing; adapters fill in whatever the
/// provider returned and leave the plausibility decision to the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub source: ProviderId,
    pub symbol: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<u64>,
    pub timestamp: Option<UtcDateTime>,
}

impl RawQuote {
    pub fn new(source: ProviderId) -> Self {
        Self {
            source,
            symbol: None,
            price: None,
            currency: None,
            change: None,
            change_percent: None,
            volume: None,
            timestamp: None,
        }
    }

    /// Shorthand for the three required fields.
    pub fn priced(
        source: ProviderId,
        symbol: impl Into<String>,
        price: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: Some(symbol.into()),
            price: Some(price),
            currency: Some(currency.into()),
            ..Self::new(source)
        }
    }
}

/// A reading that passed validation: `price > 0` and `currency` is allow-listed.
///
/// Only [`crate::Validator`] constructs values of this type, and they are never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    symbol: Symbol,
    price: f64,
    currency: String,
    change: Option<f64>,
    change_percent: Option<f64>,
    volume: Option<u64>,
    timestamp: UtcDateTime,
    source: ProviderId,
}

impl Quote {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn accepted(
        symbol: Symbol,
        price: f64,
        currency: String,
        change: Option<f64>,
        change_percent: Option<f64>,
        volume: Option<u64>,
        timestamp: UtcDateTime,
        source: ProviderId,
    ) -> Self {
        Self {
            symbol,
            price,
            currency,
            change,
            change_percent,
            volume,
            timestamp,
            source,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn change(&self) -> Option<f64> {
        self.change
    }

    pub fn change_percent(&self) -> Option<f64> {
        self.change_percent
    }

    pub fn volume(&self) -> Option<u64> {
        self.volume
    }

    pub fn timestamp(&self) -> UtcDateTime {
        self.timestamp
    }

    pub fn source(&self) -> ProviderId {
        self.source
    }
}

/// Validate and normalize currency to uppercase 3-letter code.
pub fn validate_currency_code(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    let is_valid = normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_alphabetic());

    if !is_valid {
        return Err(ValidationError::InvalidCurrency {
            value: input.to_owned(),
        });
    }

    Ok(normalized)
}
