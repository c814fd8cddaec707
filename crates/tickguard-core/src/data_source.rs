//! Source adapter contract and adapter-level errors.
//!
//! A [`SourceAdapter`] wraps one upstream provider. It alone owns transport,
//! authentication/session handling and wire-format parsing; the engine only
//! sees the resulting [`RawQuote`] or a classified [`SourceError`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tickguard_core::{FetchFuture, ProviderId, RawQuote, SourceAdapter, Symbol};
//!
//! struct FixedPrice;
//!
//! impl SourceAdapter for FixedPrice {
//!     fn id(&self) -> ProviderId {
//!         ProviderId::Yahoo
//!     }
//!
//!     fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
//!         Box::pin(async move {
//!             Ok(RawQuote::priced(ProviderId::Yahoo, symbol.as_str(), 100.0, "USD"))
//!         })
//!     }
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::monitor::ErrorKind;
use crate::{ProviderId, RawQuote, Symbol};

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Connection failure or other transient transport problem.
    Network,
    /// The adapter's own per-request timeout fired.
    Timeout,
    /// Provider-side throttling signal (HTTP 429, quota message, local quota guard).
    RateLimited,
    /// Session or credentials rejected; the adapter has already tried to refresh.
    AuthExpired,
    /// The provider answered but the body could not be parsed.
    Malformed,
    /// The provider does not know the symbol.
    NotFound,
    Internal,
}

/// Structured source error used by the fallback loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::AuthExpired, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Malformed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Internal, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Network => "source.network",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::AuthExpired => "source.auth_expired",
            SourceErrorKind::Malformed => "source.malformed",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::Internal => "source.internal",
        }
    }

    /// Metric bucket this error is counted under.
    pub const fn error_kind(&self) -> ErrorKind {
        match self.kind {
            SourceErrorKind::Network => ErrorKind::Network,
            SourceErrorKind::Timeout => ErrorKind::Timeout,
            SourceErrorKind::RateLimited => ErrorKind::RateLimited,
            SourceErrorKind::AuthExpired => ErrorKind::AuthExpired,
            SourceErrorKind::Malformed | SourceErrorKind::NotFound => {
                ErrorKind::MalformedResponse
            }
            SourceErrorKind::Internal => ErrorKind::Internal,
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Boxed future returned by [`SourceAdapter::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<RawQuote, SourceError>> + Send + 'a>>;

/// Connector to one external quote provider.
///
/// Implementations must be `Send + Sync`; the engine shares one instance
/// across every concurrent caller. Each call is expected to enforce its own
/// network timeout.
pub trait SourceAdapter: Send + Sync {
    /// Identifier used for rate limiting, circuit state and metrics.
    fn id(&self) -> ProviderId;

    /// Fetches the provider's current reading for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on transport failure, throttling, expired
    /// sessions or an unparseable response. Implausible-but-parseable values
    /// should be returned as `Ok` so the validator can reject them.
    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let error = SourceError::rate_limited("quota exhausted");
        assert_eq!(error.to_string(), "quota exhausted (source.rate_limited)");
        assert_eq!(error.error_kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn unknown_symbols_count_as_malformed_responses() {
        assert_eq!(
            SourceError::not_found("no data").error_kind(),
            ErrorKind::MalformedResponse
        );
    }
}
