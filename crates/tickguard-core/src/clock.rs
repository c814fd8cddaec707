//! Injectable time source.
//!
//! Every timing decision in the engine (rate-limit spacing, circuit cooldowns,
//! cache freshness, latency) reads time through a [`Clock`], so tests can move
//! time forward without sleeping.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Monotonic time source with an async sleep.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Production clock backed by tokio's timer, so paused tokio test time applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration and returns at once.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.lock_offset();
        *offset = offset.saturating_add(by);
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        *self.lock_offset()
    }

    fn lock_offset(&self) -> MutexGuard<'_, Duration> {
        self.offset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.lock_offset()
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
