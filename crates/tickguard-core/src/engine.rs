//! Ordered-fallback quote retrieval.
//!
//! [`Engine`] is the only component callers talk to. It owns the cache, the
//! per-source rate limiters and circuit breakers, the validator and the
//! stability monitor, and composes them into one lookup:
//!
//! 1. Serve a fresh cache entry without touching any source (unless
//!    `force_refresh`).
//! 2. Walk the adapters in the configured priority order. Skip sources whose
//!    circuit is open, wait for the source's rate limiter, then fetch and
//!    validate inside the circuit breaker. The first accepted quote is cached
//!    and returned; later adapters are not called.
//! 3. If every source failed or was skipped, serve the cached entry: tagged
//!    cached when another caller stored it within the TTL meanwhile,
//!    otherwise tagged stale.
//! 4. Otherwise report [`QuoteError::DataUnavailable`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapters::{AlphaVantageAdapter, FinnhubAdapter, YahooAdapter};
use crate::cache::{CacheLookup, QuoteCache};
use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitCallError, CircuitSnapshot};
use crate::clock::{Clock, TokioClock};
use crate::config::{ApiKeys, EngineConfig};
use crate::data_source::{SourceAdapter, SourceError};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::monitor::{ErrorKind, HealthScope, HealthSnapshot, StabilityMonitor};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::validator::{Rejection, Validator};
use crate::{ConfigError, ProviderId, Quote, QuoteError, Symbol, UtcDateTime};

/// Per-call options for [`Engine::get_quote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteOptions {
    /// Skip the fresh-cache fast path. Rate limits and circuits still apply.
    pub force_refresh: bool,
    /// Abandon the lookup after this long and return [`QuoteError::Timeout`].
    pub deadline: Option<Duration>,
}

impl QuoteOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Where the returned quote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched and validated during this call.
    Live,
    /// Served from a cache entry still inside its TTL.
    Cached,
    /// Every source failed; served from an expired or bypassed cache entry.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    /// Not called because its circuit was open.
    Skipped,
    Failed { kind: ErrorKind, message: String },
}

/// One step of the fallback chain, for the caller's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub source: ProviderId,
    pub sweep: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteOutcome {
    pub quote: Quote,
    pub freshness: Freshness,
    pub attempts: Vec<AttemptRecord>,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
}

impl QuoteOutcome {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub metrics: HealthSnapshot,
    pub circuit: CircuitSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub generated_at: UtcDateTime,
    pub global: HealthSnapshot,
    pub sources: BTreeMap<ProviderId, SourceHealth>,
    pub cache_entries: usize,
}

/// Why one adapter call did not yield a quote.
enum AttemptFailure {
    Source(SourceError),
    Rejected(Rejection),
}

impl AttemptFailure {
    fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Source(error) => error.error_kind(),
            Self::Rejected(_) => ErrorKind::ValidationRejected,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Source(error) => error.to_string(),
            Self::Rejected(rejection) => rejection.to_string(),
        }
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    clock: Option<Arc<dyn Clock>>,
    retry: RetryPolicy,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            adapters: Vec::new(),
            clock: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Registers an adapter. A later adapter with the same id replaces an earlier one.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<Engine, ConfigError> {
        self.config.validate()?;

        let mut adapters: HashMap<ProviderId, Arc<dyn SourceAdapter>> = HashMap::new();
        for adapter in self.adapters {
            if adapters.insert(adapter.id(), adapter.clone()).is_some() {
                warn!(source = %adapter.id(), "adapter registered twice, keeping the last one");
            }
        }
        if let Some(missing) = self
            .config
            .adapter_priority_order
            .iter()
            .find(|source| !adapters.contains_key(source))
        {
            return Err(ConfigError::AdapterNotRegistered(*missing));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let rate_limiter = RateLimiter::new(clock.clone());
        for source in &self.config.adapter_priority_order {
            rate_limiter.configure(*source, self.config.rate_limit_for(*source));
        }

        let cache = match self.config.cache_ttl_secs {
            0 => QuoteCache::disabled(clock.clone()),
            _ => QuoteCache::new(
                self.config.cache_ttl(),
                self.config.cache_capacity,
                clock.clone(),
            ),
        };

        info!(
            priority = ?self.config.adapter_priority_order,
            cache_ttl_secs = self.config.cache_ttl_secs,
            failure_threshold = self.config.failure_threshold,
            "quote engine ready"
        );

        Ok(Engine {
            breakers: CircuitBreakerRegistry::new(self.config.circuit_breaker(), clock.clone()),
            validator: Validator::new(self.config.validation.clone()),
            monitor: StabilityMonitor::new(self.config.monitor_window_size),
            cache,
            rate_limiter,
            adapters,
            retry: self.retry,
            clock,
            config: self.config,
        })
    }
}

/// Resilient market-data engine. Construct once and share by reference.
pub struct Engine {
    config: EngineConfig,
    adapters: HashMap<ProviderId, Arc<dyn SourceAdapter>>,
    rate_limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    validator: Validator,
    cache: QuoteCache,
    monitor: StabilityMonitor,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine over the built-in HTTP adapters, configured from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(EngineConfig::from_env()?, &ApiKeys::from_env())
    }

    /// Engine over the built-in HTTP adapters.
    ///
    /// Sources without credentials are dropped from the priority order with a
    /// warning; it is an error if none remain.
    pub fn from_config(config: EngineConfig, keys: &ApiKeys) -> Result<Self, ConfigError> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        Self::from_config_with_http(config, keys, http)
    }

    pub fn from_config_with_http(
        mut config: EngineConfig,
        keys: &ApiKeys,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        let timeout = config.request_timeout();
        let mut builder_adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![Arc::new(YahooAdapter::new(http.clone()).with_timeout(timeout))];
        if let Some(key) = &keys.alphavantage {
            builder_adapters.push(Arc::new(
                AlphaVantageAdapter::new(http.clone(), key.clone()).with_timeout(timeout),
            ));
        }
        if let Some(key) = &keys.finnhub {
            builder_adapters.push(Arc::new(
                FinnhubAdapter::new(http, key.clone()).with_timeout(timeout),
            ));
        }

        let available: Vec<ProviderId> = builder_adapters.iter().map(|a| a.id()).collect();
        config.adapter_priority_order.retain(|source| {
            let keep = available.contains(source);
            if !keep {
                warn!(source = %source, "no API key configured, source disabled");
            }
            keep
        });

        builder_adapters
            .into_iter()
            .fold(EngineBuilder::new(config), EngineBuilder::with_adapter)
            .build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn priority_order(&self) -> &[ProviderId] {
        &self.config.adapter_priority_order
    }

    /// Looks up one symbol through cache, fallback chain and stale cache.
    ///
    /// # Errors
    ///
    /// [`QuoteError::InvalidSymbol`] before any work is done,
    /// [`QuoteError::Timeout`] when `options.deadline` expires, and
    /// [`QuoteError::DataUnavailable`] when no source and no cache entry can answer.
    pub async fn get_quote(
        &self,
        symbol: &str,
        options: QuoteOptions,
    ) -> Result<QuoteOutcome, QuoteError> {
        let symbol = Symbol::parse(symbol)?;

        let Some(deadline) = options.deadline else {
            return self.resolve(&symbol, options.force_refresh).await;
        };

        match tokio::time::timeout(deadline, self.resolve(&symbol, options.force_refresh)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(symbol = %symbol, deadline_ms = deadline.as_millis() as u64, "quote lookup timed out");
                Err(QuoteError::Timeout {
                    symbol: symbol.to_string(),
                    after: deadline,
                })
            }
        }
    }

    /// Runs [`Engine::get_quote`] for every symbol with bounded concurrency.
    ///
    /// Results are keyed by normalized symbol (or the trimmed input when it
    /// does not parse). One failure never affects the others.
    pub async fn get_multiple_quotes<S>(
        &self,
        symbols: &[S],
        options: QuoteOptions,
    ) -> BTreeMap<String, Result<QuoteOutcome, QuoteError>>
    where
        S: AsRef<str>,
    {
        stream::iter(symbols.iter().map(|raw| async move {
            let raw = raw.as_ref();
            let key = Symbol::parse(raw)
                .map(|symbol| symbol.to_string())
                .unwrap_or_else(|_| raw.trim().to_owned());
            (key, self.get_quote(raw, options).await)
        }))
        .buffer_unordered(self.config.batch_concurrency.max(1))
        .collect()
        .await
    }

    pub fn health_snapshot(&self, scope: HealthScope) -> HealthSnapshot {
        self.monitor.snapshot(scope)
    }

    pub fn circuit_snapshot(&self, source: ProviderId) -> CircuitSnapshot {
        self.breakers.breaker(source).snapshot()
    }

    pub async fn health_report(&self) -> HealthReport {
        let sources = self
            .breakers
            .snapshots(self.priority_order())
            .into_iter()
            .map(|(source, circuit)| {
                let metrics = self.monitor.snapshot(HealthScope::Source(source));
                (source, SourceHealth { metrics, circuit })
            })
            .collect();

        HealthReport {
            generated_at: UtcDateTime::now(),
            global: self.monitor.snapshot(HealthScope::Global),
            sources,
            cache_entries: self.cache.len().await,
        }
    }

    /// Drops every cache entry and returns how many were removed.
    pub async fn clear_cache(&self) -> usize {
        let purged = self.cache.clear().await;
        info!(purged, "quote cache cleared");
        purged
    }

    async fn resolve(
        &self,
        symbol: &Symbol,
        force_refresh: bool,
    ) -> Result<QuoteOutcome, QuoteError> {
        let started = self.clock.now();

        if !force_refresh {
            if let CacheLookup::Fresh(quote) = self.cache.get(symbol).await {
                debug!(symbol = %symbol, "serving fresh cache entry");
                return Ok(QuoteOutcome {
                    quote,
                    freshness: Freshness::Cached,
                    attempts: Vec::new(),
                    warnings: Vec::new(),
                    latency_ms: self.elapsed_ms(started),
                });
            }
        }

        let mut attempts = Vec::new();
        for sweep in 0..self.retry.max_sweeps {
            if sweep > 0 {
                let delay = self.retry.delay_before_sweep(sweep);
                debug!(symbol = %symbol, sweep, delay_ms = delay.as_millis() as u64, "starting another sweep");
                self.clock.sleep(delay).await;
            }

            if let Some(quote) = self.sweep(symbol, sweep, &mut attempts).await {
                self.cache.put(symbol.clone(), quote.clone()).await;
                return Ok(QuoteOutcome {
                    quote,
                    freshness: Freshness::Live,
                    attempts,
                    warnings: Vec::new(),
                    latency_ms: self.elapsed_ms(started),
                });
            }
        }

        let fallback = match self.cache.get(symbol).await {
            // Another caller stored a quote while this chain was failing.
            CacheLookup::Fresh(quote) if !force_refresh => {
                debug!(symbol = %symbol, "chain failed, serving entry stored meanwhile");
                return Ok(QuoteOutcome {
                    quote,
                    freshness: Freshness::Cached,
                    attempts,
                    warnings: Vec::new(),
                    latency_ms: self.elapsed_ms(started),
                });
            }
            CacheLookup::Fresh(quote) | CacheLookup::Stale(quote) => Some(quote),
            CacheLookup::Miss => None,
        };

        if let Some(quote) = fallback {
            let age_secs = self
                .cache
                .age(symbol)
                .await
                .map(|age| age.as_secs())
                .unwrap_or_default();
            warn!(symbol = %symbol, age_secs, "every source failed, serving stale cache entry");
            let warning = format!(
                "every source failed; serving cached {} quote from {age_secs}s ago",
                quote.source()
            );
            return Ok(QuoteOutcome {
                quote,
                freshness: Freshness::Stale,
                attempts,
                warnings: vec![warning],
                latency_ms: self.elapsed_ms(started),
            });
        }

        warn!(symbol = %symbol, attempts = attempts.len(), "no source or cache entry could answer");
        Err(QuoteError::DataUnavailable {
            symbol: symbol.to_string(),
            attempts,
        })
    }

    /// One pass over the priority order. Each adapter is called at most once.
    async fn sweep(
        &self,
        symbol: &Symbol,
        sweep: u32,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Option<Quote> {
        for source in &self.config.adapter_priority_order {
            let source = *source;
            let Some(adapter) = self.adapters.get(&source) else {
                continue;
            };

            let breaker = self.breakers.breaker(source);
            if !breaker.permits() {
                debug!(symbol = %symbol, source = %source, "circuit open, skipping source");
                attempts.push(AttemptRecord {
                    source,
                    sweep,
                    outcome: AttemptOutcome::Skipped,
                    latency_ms: 0,
                });
                continue;
            }

            self.rate_limiter.acquire(source).await;

            let started = self.clock.now();
            let result = breaker
                .call(async {
                    let raw = adapter
                        .fetch(symbol)
                        .await
                        .map_err(AttemptFailure::Source)?;
                    self.validator
                        .validate(&raw, symbol)
                        .map_err(AttemptFailure::Rejected)
                })
                .await;
            let latency_ms = self.elapsed_ms(started);

            let outcome = match result {
                Ok(quote) => {
                    self.monitor.record(source, true, latency_ms, None);
                    attempts.push(AttemptRecord {
                        source,
                        sweep,
                        outcome: AttemptOutcome::Accepted,
                        latency_ms,
                    });
                    info!(symbol = %symbol, source = %source, price = quote.price(), latency_ms, "quote accepted");
                    return Some(quote);
                }
                Err(CircuitCallError::Open { .. }) => {
                    // Lost the half-open probe slot to a concurrent caller.
                    self.monitor
                        .record(source, false, latency_ms, Some(ErrorKind::CircuitOpen));
                    AttemptOutcome::Skipped
                }
                Err(CircuitCallError::Inner(failure)) => {
                    let kind = failure.error_kind();
                    let message = failure.message();
                    self.monitor.record(source, false, latency_ms, Some(kind));
                    match &failure {
                        AttemptFailure::Rejected(_) => {
                            warn!(symbol = %symbol, source = %source, reason = %message, "candidate rejected")
                        }
                        AttemptFailure::Source(_) => {
                            debug!(symbol = %symbol, source = %source, error = %message, "source failed")
                        }
                    }
                    AttemptOutcome::Failed { kind, message }
                }
            };

            attempts.push(AttemptRecord {
                source,
                sweep,
                outcome,
                latency_ms,
            });
        }

        None
    }

    fn elapsed_ms(&self, since: std::time::Instant) -> u64 {
        self.clock.elapsed_since(since).as_millis() as u64
    }
}
