//! Retry policy for whole fallback-chain sweeps.
//!
//! A sweep is one pass over the priority order. Within a sweep each adapter is
//! invoked at most once; a further sweep only starts after every adapter in the
//! previous one failed or was skipped.

use std::time::Duration;

/// Delay strategy between sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^retry`, capped at `max`, optionally with +/- 50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(retry.min(i32::MAX as u32) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let delay = Duration::try_from_secs_f64(seconds).unwrap_or(max);

                if !jitter {
                    return delay;
                }

                let spread_ms = delay.as_millis() as u64 / 2;
                let offset = fastrand::u64(0..=spread_ms * 2);
                let total_ms = (delay.as_millis() as u64 + offset).saturating_sub(spread_ms);
                Duration::from_millis(total_ms)
            }
        }
    }
}

/// How many sweeps the engine makes before falling back to the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_sweeps: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_sweep()
    }
}

impl RetryPolicy {
    /// One pass over the chain, no retries.
    pub fn single_sweep() -> Self {
        Self {
            max_sweeps: 1,
            backoff: Backoff::default(),
        }
    }

    pub fn sweeps(max_sweeps: u32, backoff: Backoff) -> Self {
        Self {
            max_sweeps: max_sweeps.max(1),
            backoff,
        }
    }

    /// Delay before sweep `sweep` (0-based); the first sweep starts at once.
    pub fn delay_before_sweep(&self, sweep: u32) -> Duration {
        match sweep {
            0 => Duration::ZERO,
            retry => self.backoff.delay(retry - 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_with_jitter_stays_within_half() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..10 {
            for retry in 0..5 {
                let delay_ms = backoff.delay(retry).as_millis() as f64;
                let expected = (100.0 * 2_f64.powi(retry as i32)).min(1000.0);
                assert!(delay_ms >= expected * 0.49, "retry={retry}, delay_ms={delay_ms}");
                assert!(delay_ms <= expected * 1.51, "retry={retry}, delay_ms={delay_ms}");
            }
        }
    }

    #[test]
    fn test_default_policy_is_a_single_sweep() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_sweeps, 1);
        assert_eq!(policy.delay_before_sweep(0), Duration::ZERO);
    }

    #[test]
    fn test_later_sweeps_wait_for_backoff() {
        let policy = RetryPolicy::sweeps(
            3,
            Backoff::Fixed {
                delay: Duration::from_millis(500),
            },
        );

        assert_eq!(policy.delay_before_sweep(0), Duration::ZERO);
        assert_eq!(policy.delay_before_sweep(1), Duration::from_millis(500));
        assert_eq!(policy.delay_before_sweep(2), Duration::from_millis(500));
        assert_eq!(RetryPolicy::sweeps(0, Backoff::default()).max_sweeps, 1);
    }
}
