//! # Tickguard Core
//!
//! Resilient market-data acquisition: fetch prices from several unreliable,
//! rate-limited providers and route around their failures.
//!
//! ## Overview
//!
//! - **Ordered fallback** over provider adapters, always in the configured priority order
//! - **Circuit breaking** per provider (Closed / Open / HalfOpen)
//! - **Rate limiting** as minimum spacing between calls to one provider
//! - **Validation** of every candidate price before it is trusted
//! - **Caching** with a TTL fast path and a stale-read fallback
//! - **Stability monitoring** over bounded sliding windows
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Yahoo, Alpha Vantage and Finnhub adapters |
//! | [`cache`] | TTL + LRU quote cache with stale reads |
//! | [`circuit_breaker`] | Per-source circuit breakers |
//! | [`clock`] | Injectable time source |
//! | [`config`] | Engine configuration and API keys |
//! | [`data_source`] | Adapter trait and adapter errors |
//! | [`domain`] | Symbols, timestamps, raw and accepted quotes |
//! | [`engine`] | The fallback orchestrator |
//! | [`error`] | Validation, configuration and lookup errors |
//! | [`http_client`] | HTTP client abstraction |
//! | [`monitor`] | Request metrics and health snapshots |
//! | [`provider_policy`] | Per-provider rate and quota defaults |
//! | [`rate_limiter`] | Per-source call spacing |
//! | [`retry`] | Whole-chain retry policy |
//! | [`source`] | Provider identifiers |
//! | [`throttling`] | Adapter-side hard quota guard |
//! | [`validator`] | Candidate plausibility rules |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tickguard_core::{Engine, QuoteOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::from_env()?;
//!
//!     let outcome = engine.get_quote("AAPL", QuoteOptions::default()).await?;
//!     if outcome.is_stale() {
//!         eprintln!("warning: price may be outdated");
//!     }
//!     println!("{} {:.2} {}", outcome.quote.symbol(), outcome.quote.price(), outcome.quote.currency());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Application    │
//! └────────┬────────┘
//!          │ get_quote / get_multiple_quotes
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │     Engine      │────▶│   Quote Cache    │
//! └────────┬────────┘     └──────────────────┘
//!          │ per adapter, in priority order
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Rate Limiter   │────▶│ Circuit Breaker  │
//! └─────────────────┘     └────────┬─────────┘
//!                                  ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Validator     │◀────│  Source Adapter  │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Lookups never panic and never fabricate a price:
//!
//! ```rust
//! use tickguard_core::QuoteError;
//!
//! fn describe(error: &QuoteError) -> &'static str {
//!     match error {
//!         QuoteError::InvalidSymbol(_) => "fix the input",
//!         QuoteError::DataUnavailable { .. } => "no source and no cache entry",
//!         QuoteError::Timeout { .. } => "deadline expired",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are read from the environment and redacted from `Debug` output
//! - Finnhub keys travel in a header, not the URL

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod monitor;
pub mod provider_policy;
pub mod rate_limiter;
pub mod retry;
pub mod source;
pub mod throttling;
pub mod validator;

// Adapter implementations
pub use adapters::{AlphaVantageAdapter, FinnhubAdapter, YahooAdapter};

// Caching
pub use cache::{CacheLookup, QuoteCache};

// Circuit breaker
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitCallError,
    CircuitSnapshot, CircuitState,
};

// Time
pub use clock::{Clock, ManualClock, TokioClock};

// Configuration
pub use config::{ApiKeys, EngineConfig};

// Adapter contract
pub use data_source::{FetchFuture, SourceAdapter, SourceError, SourceErrorKind};

// Domain models
pub use domain::{validate_currency_code, AssetClass, Quote, RawQuote, Symbol, UtcDateTime};

// Orchestration
pub use engine::{
    AttemptOutcome, AttemptRecord, Engine, EngineBuilder, Freshness, HealthReport, QuoteOptions,
    QuoteOutcome, SourceHealth,
};

// Error types
pub use error::{ConfigError, QuoteError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};

// Monitoring
pub use monitor::{ErrorKind, HealthScope, HealthSnapshot, RequestMetric, StabilityMonitor};

// Provider policies
pub use provider_policy::{HardQuota, ProviderPolicy};

// Rate limiting
pub use rate_limiter::{RateLimitConfig, RateLimiter};

// Retry logic
pub use retry::{Backoff, RetryPolicy};

// Source identifiers
pub use source::ProviderId;

// Throttling
pub use throttling::QuotaGuard;

// Validation
pub use validator::{PriceBounds, Rejection, ValidationConfig, Validator};
