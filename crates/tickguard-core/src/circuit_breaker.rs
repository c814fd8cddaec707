use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::ProviderId;

/// Runtime circuit state for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_cooldown: Duration::from_secs(60),
        }
    }
}

/// Outcome of [`CircuitBreaker::call`] when the wrapped call did not succeed.
#[derive(Debug, Error)]
pub enum CircuitCallError<E> {
    /// Fail-fast rejection. The wrapped future was never polled and no
    /// failure was counted.
    #[error("circuit open for source '{provider}'")]
    Open { provider: ProviderId },

    /// The wrapped call ran and failed; the failure has been counted.
    #[error("{0}")]
    Inner(E),
}

/// Serializable view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit last opened, while Open.
    pub opened_ms_ago: Option<u64>,
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Thread-safe circuit breaker for one source.
#[derive(Debug)]
pub struct CircuitBreaker {
    source: ProviderId,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(source: ProviderId, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            config,
            clock,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub fn source(&self) -> ProviderId {
        self.source
    }

    /// Whether a call made now would be admitted. Changes no state.
    pub fn permits(&self) -> bool {
        let inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(&inner),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Runs `call` if the circuit admits it and records the outcome.
    ///
    /// In HalfOpen only one probe may be in flight. A probe future dropped
    /// before completion frees the probe slot without recording anything.
    pub async fn call<T, E, F>(&self, call: F) -> Result<T, CircuitCallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let mut permit = self.admit().ok_or(CircuitCallError::Open {
            provider: self.source,
        })?;

        let result = call.await;
        permit.complete();

        match result {
            Ok(value) => {
                self.on_success(permit.probe);
                Ok(value)
            }
            Err(error) => {
                self.on_failure(permit.probe);
                Err(CircuitCallError::Inner(error))
            }
        }
    }

    /// Records a success of a call that held no probe slot. Resets the
    /// failure count while Closed; has no effect otherwise.
    pub fn record_success(&self) {
        self.on_success(false);
    }

    /// Records a failure of a call that held no probe slot. Only counts
    /// while Closed.
    pub fn record_failure(&self) {
        self.on_failure(false);
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                info!(source = %self.source, "probe succeeded, circuit closed");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            // A call admitted before the circuit opened cannot close it or
            // release the probe slot.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::HalfOpen if probe => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                warn!(source = %self.source, "half-open probe failed, circuit re-opened");
                self.open(&mut inner);
            }
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        source = %self.source,
                        failures = inner.consecutive_failures,
                        cooldown_secs = self.config.open_cooldown.as_secs(),
                        "circuit opened"
                    );
                    self.open(&mut inner);
                }
            }
            // A late failure from a call admitted before the circuit opened
            // neither restarts the cooldown nor fails the probe.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Stored state. An Open circuit whose cooldown has elapsed still reports
    /// Open until the next admitted call moves it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock_inner();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_ms_ago: inner
                .opened_at
                .map(|opened_at| self.clock.elapsed_since(opened_at).as_millis() as u64),
            probe_in_flight: inner.probe_in_flight,
        }
    }

    fn admit(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => Some(Permit::new(self, false)),
            CircuitState::Open if self.cooldown_elapsed(&inner) => {
                info!(source = %self.source, "circuit half-open, admitting probe");
                inner.state = CircuitState::HalfOpen;
                inner.opened_at = None;
                inner.probe_in_flight = true;
                Some(Permit::new(self, true))
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Some(Permit::new(self, true))
            }
            CircuitState::Open | CircuitState::HalfOpen => None,
        }
    }

    fn open(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(self.clock.now());
        inner.probe_in_flight = false;
    }

    fn cooldown_elapsed(&self, inner: &CircuitInner) -> bool {
        inner
            .opened_at
            .map(|opened_at| self.clock.elapsed_since(opened_at) >= self.config.open_cooldown)
            .unwrap_or(true)
    }

    fn lock_inner(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(source = %self.source, "circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Admission token. Releases an abandoned probe slot on drop.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    completed: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.completed {
            let mut inner = self.breaker.lock_inner();
            if inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
            }
        }
    }
}

/// Per-source breakers, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn breaker(&self, source: ProviderId) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|poisoned| {
            warn!("circuit breaker registry mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        breakers
            .entry(source)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(source, self.config, self.clock.clone()))
            })
            .clone()
    }

    pub fn snapshots(&self, sources: &[ProviderId]) -> BTreeMap<ProviderId, CircuitSnapshot> {
        sources
            .iter()
            .map(|source| (*source, self.breaker(*source).snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(threshold: u32, cooldown: Duration) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new());
        let breaker = CircuitBreaker::new(
            ProviderId::Yahoo,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_cooldown: cooldown,
            },
            clock.clone(),
        );
        (clock, breaker)
    }

    #[test]
    fn opens_after_threshold_failures() {
        let (_, breaker) = breaker(2, Duration::from_secs(10));

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.permits());
    }

    #[test]
    fn success_while_closed_resets_failure_count() {
        let (_, breaker) = breaker(3, Duration::from_secs(10));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_polling_or_counting() {
        let (_, breaker) = breaker(1, Duration::from_secs(60));
        breaker.record_failure();

        let mut polled = false;
        let result: Result<(), CircuitCallError<&str>> = breaker
            .call(async {
                polled = true;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CircuitCallError::Open { .. })));
        assert!(!polled);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_cooldown_then_closes_on_success() {
        let (clock, breaker) = breaker(1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(!breaker.permits());

        clock.advance(Duration::from_secs(60));
        assert!(breaker.permits());

        let result: Result<u8, CircuitCallError<&str>> = breaker.call(async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn failed_probe_reopens_and_restarts_cooldown() {
        let (clock, breaker) = breaker(1, Duration::from_secs(60));
        breaker.record_failure();
        clock.advance(Duration::from_secs(61));

        let result: Result<(), CircuitCallError<&str>> =
            breaker.call(async { Err("still down") }).await;

        assert!(matches!(result, Err(CircuitCallError::Inner("still down"))));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().opened_ms_ago, Some(0));
        clock.advance(Duration::from_secs(30));
        assert!(!breaker.permits());
    }

    #[tokio::test]
    async fn half_open_admits_a_single_probe() {
        let (clock, breaker) = breaker(1, Duration::from_secs(5));
        breaker.record_failure();
        clock.advance(Duration::from_secs(5));

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let probe = breaker.call(async move {
            let _ = wait.await;
            Ok::<_, &str>(())
        });
        tokio::pin!(probe);

        // Drive the probe until it parks on the channel.
        assert!(futures::poll!(probe.as_mut()).is_pending());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.permits());

        let second: Result<(), CircuitCallError<&str>> = breaker.call(async { Ok(()) }).await;
        assert!(matches!(second, Err(CircuitCallError::Open { .. })));

        release.send(()).unwrap();
        probe.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn late_success_does_not_close_an_open_circuit() {
        let (clock, breaker) = breaker(1, Duration::from_secs(60));

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let early = breaker.call(async move {
            let _ = wait.await;
            Ok::<_, &str>(())
        });
        tokio::pin!(early);
        assert!(futures::poll!(early.as_mut()).is_pending());

        let failed: Result<(), CircuitCallError<&str>> = breaker.call(async { Err("down") }).await;
        assert!(matches!(failed, Err(CircuitCallError::Inner("down"))));
        assert_eq!(breaker.state(), CircuitState::Open);

        release.send(()).unwrap();
        early.await.unwrap();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 1);
        assert!(!breaker.permits());
        clock.advance(Duration::from_secs(60));
        assert!(breaker.permits());
    }

    #[tokio::test]
    async fn late_outcomes_leave_the_half_open_probe_in_charge() {
        let (clock, breaker) = breaker(1, Duration::from_secs(5));

        let (release_ok, wait_ok) = tokio::sync::oneshot::channel::<()>();
        let early_ok = breaker.call(async move {
            let _ = wait_ok.await;
            Ok::<_, &str>(())
        });
        tokio::pin!(early_ok);
        assert!(futures::poll!(early_ok.as_mut()).is_pending());

        let (release_err, wait_err) = tokio::sync::oneshot::channel::<()>();
        let early_err = breaker.call(async move {
            let _ = wait_err.await;
            Err::<(), _>("timed out")
        });
        tokio::pin!(early_err);
        assert!(futures::poll!(early_err.as_mut()).is_pending());

        let failed: Result<(), CircuitCallError<&str>> = breaker.call(async { Err("down") }).await;
        assert!(failed.is_err());
        clock.advance(Duration::from_secs(5));

        let (release_probe, wait_probe) = tokio::sync::oneshot::channel::<()>();
        let probe = breaker.call(async move {
            let _ = wait_probe.await;
            Ok::<_, &str>(())
        });
        tokio::pin!(probe);
        assert!(futures::poll!(probe.as_mut()).is_pending());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        release_ok.send(()).unwrap();
        early_ok.await.unwrap();
        release_err.send(()).unwrap();
        assert!(early_err.await.is_err());

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.snapshot().probe_in_flight);
        assert!(!breaker.permits());

        release_probe.send(()).unwrap();
        probe.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn dropped_probe_records_nothing_and_frees_the_slot() {
        let (clock, breaker) = breaker(1, Duration::from_secs(5));
        breaker.record_failure();
        clock.advance(Duration::from_secs(5));

        {
            let probe = breaker.call(std::future::pending::<Result<(), &str>>());
            tokio::pin!(probe);
            assert!(futures::poll!(probe.as_mut()).is_pending());
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), 1);
        assert!(breaker.permits());
    }

    #[test]
    fn registry_hands_out_one_breaker_per_source() {
        let registry = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            Arc::new(ManualClock::new()),
        );

        registry.breaker(ProviderId::Yahoo).record_failure();

        assert_eq!(registry.breaker(ProviderId::Yahoo).consecutive_failures(), 1);
        assert_eq!(registry.breaker(ProviderId::Finnhub).consecutive_failures(), 0);
        let snapshots = registry.snapshots(&[ProviderId::Yahoo, ProviderId::Finnhub]);
        assert_eq!(snapshots[&ProviderId::Yahoo].consecutive_failures, 1);
    }
}
