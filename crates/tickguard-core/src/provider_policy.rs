use std::time::Duration;

use crate::rate_limiter::RateLimitConfig;
use crate::ProviderId;

/// Provider-side usage limits.
///
/// `spacing` feeds the engine's rate limiter. `hard_quota` is enforced inside
/// the adapter and fails fast once exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub spacing: RateLimitConfig,
    pub hard_quota: Option<HardQuota>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardQuota {
    pub window: Duration,
    pub limit: u32,
}

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

impl ProviderPolicy {
    pub fn yahoo_default() -> Self {
        Self {
            provider_id: ProviderId::Yahoo,
            spacing: RateLimitConfig::new(30, Duration::from_secs(60)),
            hard_quota: None,
        }
    }

    /// Free tier: 5 requests per minute, 25 per day.
    pub fn alphavantage_default() -> Self {
        Self {
            provider_id: ProviderId::AlphaVantage,
            spacing: RateLimitConfig::new(5, Duration::from_secs(60)),
            hard_quota: Some(HardQuota {
                window: DAY,
                limit: 25,
            }),
        }
    }

    /// Free tier: 60 requests per minute.
    pub fn finnhub_default() -> Self {
        Self {
            provider_id: ProviderId::Finnhub,
            spacing: RateLimitConfig::new(60, Duration::from_secs(60)),
            hard_quota: None,
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Yahoo => Self::yahoo_default(),
            ProviderId::AlphaVantage => Self::alphavantage_default(),
            ProviderId::Finnhub => Self::finnhub_default(),
        }
    }
}
