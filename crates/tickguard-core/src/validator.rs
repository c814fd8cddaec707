//! Plausibility rules for adapter output.
//!
//! A rejection here is an adapter failure: the engine counts it against the
//! source's circuit exactly like a transport error.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{validate_currency_code, AssetClass, Quote, RawQuote, Symbol, UtcDateTime};

/// Open interval an accepted price must fall strictly inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub floor: f64,
    pub ceiling: f64,
}

impl Default for PriceBounds {
    fn default() -> Self {
        Self {
            floor: 0.0,
            ceiling: 1_000_000.0,
        }
    }
}

impl PriceBounds {
    pub fn new(floor: f64, ceiling: f64) -> Self {
        Self { floor, ceiling }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub allowed_currencies: BTreeSet<String>,
    pub max_change_percent: f64,
    pub default_bounds: PriceBounds,
    pub class_bounds: BTreeMap<AssetClass, PriceBounds>,
    pub symbol_classes: BTreeMap<Symbol, AssetClass>,
    pub symbol_bounds: BTreeMap<Symbol, PriceBounds>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_currencies: ["USD", "CHF", "EUR", "GBP"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            max_change_percent: 50.0,
            default_bounds: PriceBounds::default(),
            class_bounds: BTreeMap::new(),
            symbol_classes: BTreeMap::new(),
            symbol_bounds: BTreeMap::new(),
        }
    }
}

impl ValidationConfig {
    pub fn with_symbol_bounds(mut self, symbol: Symbol, bounds: PriceBounds) -> Self {
        self.symbol_bounds.insert(symbol, bounds);
        self
    }

    pub fn with_symbol_class(mut self, symbol: Symbol, class: AssetClass) -> Self {
        self.symbol_classes.insert(symbol, class);
        self
    }

    pub fn with_class_bounds(mut self, class: AssetClass, bounds: PriceBounds) -> Self {
        self.class_bounds.insert(class, bounds);
        self
    }

    pub fn allow_currency(mut self, code: &str) -> Self {
        self.allowed_currencies.insert(code.trim().to_ascii_uppercase());
        self
    }

    /// Bounds for `symbol`: explicit symbol entry, then its asset class, then the default.
    pub fn bounds_for(&self, symbol: &Symbol) -> PriceBounds {
        if let Some(bounds) = self.symbol_bounds.get(symbol) {
            return *bounds;
        }
        self.symbol_classes
            .get(symbol)
            .and_then(|class| self.class_bounds.get(class))
            .copied()
            .unwrap_or(self.default_bounds)
    }
}

/// The rule a candidate failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("reported symbol '{found}' does not match requested '{expected}'")]
    SymbolMismatch { expected: String, found: String },

    #[error("field '{0}' is not a finite number")]
    NonFinite(&'static str),

    #[error("price {price} is not positive")]
    NonPositivePrice { price: f64 },

    #[error("price {price} is not above the plausibility floor {floor}")]
    BelowFloor { price: f64, floor: f64 },

    #[error("price {price} is not below the plausibility ceiling {ceiling}")]
    AboveCeiling { price: f64, ceiling: f64 },

    #[error("change percent {value} exceeds +/-{max}")]
    ChangePercentOutOfRange { value: f64, max: f64 },

    #[error("currency '{currency}' is not allowed")]
    CurrencyNotAllowed { currency: String },
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Accepts `raw` as a reading for `requested`, or names the rule it broke.
    pub fn validate(&self, raw: &RawQuote, requested: &Symbol) -> Result<Quote, Rejection> {
        let reported = raw.symbol.as_deref().ok_or(Rejection::MissingField("symbol"))?;
        let price = raw.price.ok_or(Rejection::MissingField("price"))?;
        let currency = raw
            .currency
            .as_deref()
            .ok_or(Rejection::MissingField("currency"))?;

        match Symbol::parse(reported) {
            Ok(symbol) if symbol == *requested => {}
            _ => {
                return Err(Rejection::SymbolMismatch {
                    expected: requested.to_string(),
                    found: reported.to_owned(),
                })
            }
        }

        if !price.is_finite() {
            return Err(Rejection::NonFinite("price"));
        }
        if price <= 0.0 {
            return Err(Rejection::NonPositivePrice { price });
        }

        let bounds = self.config.bounds_for(requested);
        if price <= bounds.floor {
            return Err(Rejection::BelowFloor {
                price,
                floor: bounds.floor,
            });
        }
        if price >= bounds.ceiling {
            return Err(Rejection::AboveCeiling {
                price,
                ceiling: bounds.ceiling,
            });
        }

        if let Some(change) = raw.change {
            if !change.is_finite() {
                return Err(Rejection::NonFinite("change"));
            }
        }
        if let Some(value) = raw.change_percent {
            if !value.is_finite() {
                return Err(Rejection::NonFinite("change_percent"));
            }
            if value.abs() > self.config.max_change_percent {
                return Err(Rejection::ChangePercentOutOfRange {
                    value,
                    max: self.config.max_change_percent,
                });
            }
        }

        let currency = validate_currency_code(currency)
            .ok()
            .filter(|code| self.config.allowed_currencies.contains(code))
            .ok_or_else(|| Rejection::CurrencyNotAllowed {
                currency: currency.to_owned(),
            })?;

        Ok(Quote::accepted(
            requested.clone(),
            price,
            currency,
            raw.change,
            raw.change_percent,
            raw.volume,
            raw.timestamp.unwrap_or_else(UtcDateTime::now),
            raw.source,
        ))
    }
}
