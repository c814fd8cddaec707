//! Engine configuration.
//!
//! Loaded from JSON (file or string) and/or overlaid from `TICKGUARD_*`
//! environment variables. Every field has a default, so an empty JSON object
//! is a valid configuration.

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::provider_policy::ProviderPolicy;
use crate::rate_limiter::RateLimitConfig;
use crate::validator::ValidationConfig;
use crate::{ConfigError, ProviderId};

pub const ENV_PRIORITY: &str = "TICKGUARD_PRIORITY";
pub const ENV_CACHE_TTL_SECS: &str = "TICKGUARD_CACHE_TTL_SECS";
pub const ENV_FAILURE_THRESHOLD: &str = "TICKGUARD_FAILURE_THRESHOLD";
pub const ENV_OPEN_COOLDOWN_SECS: &str = "TICKGUARD_OPEN_COOLDOWN_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub failure_threshold: u32,
    pub open_cooldown_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub rate_limits: BTreeMap<ProviderId, RateLimitConfig>,
    pub validation: ValidationConfig,
    pub monitor_window_size: usize,
    pub adapter_priority_order: Vec<ProviderId>,
    pub batch_concurrency: usize,
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_cooldown_secs: 60,
            cache_ttl_secs: 300,
            cache_capacity: 256,
            rate_limits: ProviderId::ALL
                .into_iter()
                .map(|id| (id, ProviderPolicy::default_for(id).spacing))
                .collect(),
            validation: ValidationConfig::default(),
            monitor_window_size: 100,
            adapter_priority_order: ProviderId::ALL.to_vec(),
            batch_concurrency: 4,
            request_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env()
    }

    pub fn overlay_env(self) -> Result<Self, ConfigError> {
        self.overlay_vars(|name| std::env::var(name).ok())
    }

    /// Overlays `TICKGUARD_*` values returned by `lookup`. Empty values are ignored.
    pub fn overlay_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_PRIORITY) {
            self.adapter_priority_order = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::parse::<ProviderId>)
                .collect::<Result<Vec<_>, _>>()?;
        }
        if let Some(value) = get(ENV_CACHE_TTL_SECS) {
            self.cache_ttl_secs = parse_env(ENV_CACHE_TTL_SECS, &value)?;
        }
        if let Some(value) = get(ENV_FAILURE_THRESHOLD) {
            self.failure_threshold = parse_env(ENV_FAILURE_THRESHOLD, &value)?;
        }
        if let Some(value) = get(ENV_OPEN_COOLDOWN_SECS) {
            self.open_cooldown_secs = parse_env(ENV_OPEN_COOLDOWN_SECS, &value)?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter_priority_order.is_empty() {
            return Err(ConfigError::EmptyPriorityOrder);
        }
        for (index, source) in self.adapter_priority_order.iter().enumerate() {
            if self.adapter_priority_order[..index].contains(source) {
                return Err(ConfigError::DuplicateSource(*source));
            }
        }

        let positive = [
            ("failure_threshold", self.failure_threshold as u64),
            ("cache_capacity", self.cache_capacity as u64),
            ("monitor_window_size", self.monitor_window_size as u64),
            ("batch_concurrency", self.batch_concurrency as u64),
            ("request_timeout_secs", self.request_timeout_secs),
        ];
        if let Some((field, _)) = positive.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroValue { field });
        }
        if self
            .rate_limits
            .values()
            .any(|limit| limit.calls_per_period == 0)
        {
            return Err(ConfigError::ZeroValue {
                field: "rate_limits.calls_per_period",
            });
        }

        Ok(())
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_cooldown: Duration::from_secs(self.open_cooldown_secs),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Configured spacing for `source`, falling back to the provider's default policy.
    pub fn rate_limit_for(&self, source: ProviderId) -> RateLimitConfig {
        self.rate_limits
            .get(&source)
            .copied()
            .unwrap_or_else(|| ProviderPolicy::default_for(source).spacing)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_owned(),
    })
}

/// Provider credentials. Never logged; `Debug` redacts them.
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub alphavantage: Option<String>,
    pub finnhub: Option<String>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Prefers `TICKGUARD_`-prefixed names over the providers' conventional ones.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: [&str; 2]| {
            names
                .into_iter()
                .filter_map(&lookup)
                .map(|value| value.trim().to_owned())
                .find(|value| !value.is_empty())
        };

        Self {
            alphavantage: first(["TICKGUARD_ALPHAVANTAGE_API_KEY", "ALPHAVANTAGE_API_KEY"]),
            finnhub: first(["TICKGUARD_FINNHUB_API_KEY", "FINNHUB_API_KEY"]),
        }
    }
}

impl Debug for ApiKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("alphavantage", &redact(&self.alphavantage))
            .field("finnhub", &redact(&self.finnhub))
            .finish()
    }
}
