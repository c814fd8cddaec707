//! Per-source call spacing.
//!
//! Each source gets a minimum interval between completed `acquire` calls,
//! derived from its `calls_per_period / period` budget. Callers for the same
//! source queue on an async mutex that is held across the wait, so two
//! completions for one source are never closer together than the interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::ProviderId;

/// Call budget for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub calls_per_period: u32,
    #[serde(rename = "period_secs", with = "duration_secs")]
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_period: 60,
            period: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(calls_per_period: u32, period: Duration) -> Self {
        Self {
            calls_per_period,
            period,
        }
    }

    /// Minimum spacing between two calls.
    pub fn min_interval(&self) -> Duration {
        self.period / self.calls_per_period.max(1)
    }
}

#[derive(Debug)]
struct RateLimitState {
    last_call_at: Option<Instant>,
    min_interval: Duration,
}

type Slot = Arc<tokio::sync::Mutex<RateLimitState>>;

/// Registry of per-source spacing state.
#[derive(Debug)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    default_config: RateLimitConfig,
    slots: Mutex<HashMap<ProviderId, Slot>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            default_config: RateLimitConfig::default(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the budget for `source`, discarding any previous timing state.
    pub fn configure(&self, source: ProviderId, config: RateLimitConfig) {
        let state = RateLimitState {
            last_call_at: None,
            min_interval: config.min_interval(),
        };
        self.lock_slots()
            .insert(source, Arc::new(tokio::sync::Mutex::new(state)));
    }

    /// Waits until `source` may be called again, then stamps the call.
    ///
    /// Returns immediately on first use of a source.
    pub async fn acquire(&self, source: ProviderId) {
        let slot = self.slot(source);
        let mut state = slot.lock().await;

        if let Some(last_call_at) = state.last_call_at {
            let ready_at = last_call_at + state.min_interval;
            let now = self.clock.now();
            if ready_at > now {
                let wait = ready_at - now;
                debug!(source = %source, wait_ms = wait.as_millis() as u64, "rate limiter waiting");
                self.clock.sleep(wait).await;
            }
        }

        state.last_call_at = Some(self.clock.now());
    }

    /// Time a caller arriving now would wait for `source`, ignoring queued callers.
    pub fn pending_wait(&self, source: ProviderId) -> Duration {
        let slot = self.slot(source);
        let Ok(state) = slot.try_lock() else {
            return Duration::ZERO;
        };
        state
            .last_call_at
            .map(|last| (last + state.min_interval).saturating_duration_since(self.clock.now()))
            .unwrap_or(Duration::ZERO)
    }

    /// Forgets the last call for `source` so the next acquire is immediate.
    pub fn reset(&self, source: ProviderId) {
        let slot = self.slot(source);
        if let Ok(mut state) = slot.try_lock() {
            state.last_call_at = None;
        };
    }

    fn slot(&self, source: ProviderId) -> Slot {
        let mut slots = self.lock_slots();
        slots
            .entry(source)
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(RateLimitState {
                    last_call_at: None,
                    min_interval: self.default_config.min_interval(),
                }))
            })
            .clone()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<ProviderId, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
