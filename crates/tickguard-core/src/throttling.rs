use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock as _, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::provider_policy::HardQuota;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Adapter-side guard for a provider's hard request quota.
///
/// The whole quota is available as a burst and replenishes evenly over the
/// window, so a fresh guard never blocks the first `limit` requests.
pub struct QuotaGuard {
    limiter: DirectRateLimiter,
    quota: HardQuota,
}

impl std::fmt::Debug for QuotaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGuard").field("quota", &self.quota).finish()
    }
}

impl QuotaGuard {
    pub fn new(quota: HardQuota) -> Self {
        Self {
            limiter: RateLimiter::direct(quota_from_window(quota.window, quota.limit)),
            quota,
        }
    }

    pub fn quota(&self) -> HardQuota {
        self.quota
    }

    /// Consumes one request from the budget, or returns how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let burst = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
