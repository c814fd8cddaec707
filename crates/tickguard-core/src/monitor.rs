//! Sliding-window request metrics.
//!
//! The monitor is informational only. Routing decisions never read it; they
//! are made by the circuit breakers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ProviderId, UtcDateTime};

pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Failure bucket for the error histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    AuthExpired,
    MalformedResponse,
    ValidationRejected,
    CircuitOpen,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::AuthExpired => "auth_expired",
            Self::MalformedResponse => "malformed_response",
            Self::ValidationRejected => "validation_rejected",
            Self::CircuitOpen => "circuit_open",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMetric {
    pub at: UtcDateTime,
    pub source: ProviderId,
    pub success: bool,
    pub latency_ms: u64,
    pub error_kind: Option<ErrorKind>,
}

/// Aggregate view over one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_requests: usize,
    pub error_histogram: BTreeMap<ErrorKind, u64>,
}

impl HealthSnapshot {
    fn from_window<'a>(metrics: impl Iterator<Item = &'a RequestMetric>) -> Self {
        let mut total = 0usize;
        let mut successes = 0usize;
        let mut latency_sum = 0u64;
        let mut error_histogram = BTreeMap::new();

        for metric in metrics {
            total += 1;
            latency_sum = latency_sum.saturating_add(metric.latency_ms);
            if metric.success {
                successes += 1;
            } else if let Some(kind) = metric.error_kind {
                *error_histogram.entry(kind).or_insert(0) += 1;
            }
        }

        if total == 0 {
            return Self {
                success_rate: 1.0,
                avg_latency_ms: 0.0,
                total_requests: 0,
                error_histogram,
            };
        }

        Self {
            success_rate: successes as f64 / total as f64,
            avg_latency_ms: latency_sum as f64 / total as f64,
            total_requests: total,
            error_histogram,
        }
    }
}

/// Which window a snapshot is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthScope {
    Global,
    Source(ProviderId),
}

#[derive(Debug, Default)]
struct Windows {
    global: VecDeque<RequestMetric>,
    per_source: HashMap<ProviderId, VecDeque<RequestMetric>>,
}

/// Bounded per-source and global ring buffers of [`RequestMetric`]s.
#[derive(Debug)]
pub struct StabilityMonitor {
    capacity: usize,
    windows: Mutex<Windows>,
}

impl Default for StabilityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl StabilityMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(
        &self,
        source: ProviderId,
        success: bool,
        latency_ms: u64,
        error_kind: Option<ErrorKind>,
    ) {
        let metric = RequestMetric {
            at: UtcDateTime::now(),
            source,
            success,
            latency_ms,
            error_kind: if success { None } else { error_kind },
        };

        let mut windows = self.lock_windows();
        let capacity = self.capacity;
        push_bounded(
            windows.per_source.entry(source).or_default(),
            metric.clone(),
            capacity,
        );
        push_bounded(&mut windows.global, metric, capacity);
    }

    pub fn snapshot(&self, scope: HealthScope) -> HealthSnapshot {
        let windows = self.lock_windows();
        match scope {
            HealthScope::Global => HealthSnapshot::from_window(windows.global.iter()),
            HealthScope::Source(source) => match windows.per_source.get(&source) {
                Some(window) => HealthSnapshot::from_window(window.iter()),
                None => HealthSnapshot::from_window(std::iter::empty()),
            },
        }
    }

    /// Most recent metrics for `scope`, oldest first.
    pub fn recent(&self, scope: HealthScope) -> Vec<RequestMetric> {
        let windows = self.lock_windows();
        match scope {
            HealthScope::Global => windows.global.iter().cloned().collect(),
            HealthScope::Source(source) => windows
                .per_source
                .get(&source)
                .map(|window| window.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn lock_windows(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(|poisoned| {
            warn!("stability monitor mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn push_bounded(window: &mut VecDeque<RequestMetric>, metric: RequestMetric, capacity: usize) {
    while window.len() >= capacity {
        window.pop_front();
    }
    window.push_back(metric);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_full_health() {
        let monitor = StabilityMonitor::default();
        let snapshot = monitor.snapshot(HealthScope::Global);

        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.success_rate, 1.0);
        assert_eq!(snapshot.avg_latency_ms, 0.0);
        assert!(snapshot.error_histogram.is_empty());
    }

    #[test]
    fn snapshot_aggregates_rate_latency_and_histogram() {
        let monitor = StabilityMonitor::new(10);
        monitor.record(ProviderId::Yahoo, true, 100, None);
        monitor.record(ProviderId::Yahoo, false, 300, Some(ErrorKind::Timeout));
        monitor.record(ProviderId::Finnhub, false, 200, Some(ErrorKind::ValidationRejected));
        monitor.record(ProviderId::Finnhub, false, 0, Some(ErrorKind::ValidationRejected));

        let yahoo = monitor.snapshot(HealthScope::Source(ProviderId::Yahoo));
        assert_eq!(yahoo.total_requests, 2);
        assert_eq!(yahoo.success_rate, 0.5);
        assert_eq!(yahoo.avg_latency_ms, 200.0);
        assert_eq!(yahoo.error_histogram.get(&ErrorKind::Timeout), Some(&1));

        let global = monitor.snapshot(HealthScope::Global);
        assert_eq!(global.total_requests, 4);
        assert_eq!(global.success_rate, 0.25);
        assert_eq!(
            global.error_histogram.get(&ErrorKind::ValidationRejected),
            Some(&2)
        );
    }

    #[test]
    fn oldest_entries_drop_on_overflow() {
        let monitor = StabilityMonitor::new(3);
        monitor.record(ProviderId::Yahoo, false, 10, Some(ErrorKind::Network));
        for latency in [20, 30, 40] {
            monitor.record(ProviderId::Yahoo, true, latency, None);
        }

        let recent = monitor.recent(HealthScope::Source(ProviderId::Yahoo));
        assert_eq!(
            recent.iter().map(|m| m.latency_ms).collect::<Vec<_>>(),
            vec![20, 30, 40]
        );
        let snapshot = monitor.snapshot(HealthScope::Global);
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.success_rate, 1.0);
    }

    #[test]
    fn successful_metrics_never_carry_an_error_kind() {
        let monitor = StabilityMonitor::default();
        monitor.record(ProviderId::Yahoo, true, 5, Some(ErrorKind::Internal));

        let recent = monitor.recent(HealthScope::Global);
        assert_eq!(recent[0].error_kind, None);
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ValidationRejected).unwrap();
        assert_eq!(json, "\"validation_rejected\"");
    }
}
