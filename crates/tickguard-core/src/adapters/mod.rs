//! # Provider Adapters
//!
//! | Adapter | Endpoint | Session / auth |
//! |---------|----------|----------------|
//! | [`YahooAdapter`] | `v7/finance/quote` | cookie + crumb, refreshed once on 401 |
//! | [`AlphaVantageAdapter`] | `GLOBAL_QUOTE` | `apikey` query parameter, daily quota guard |
//! | [`FinnhubAdapter`] | `/api/v1/quote` | `X-Finnhub-Token` header |
//!
//! Adapters return whatever the provider reported as a [`crate::RawQuote`];
//! they do not judge plausibility.

mod alphavantage;
mod finnhub;
mod yahoo;

pub use alphavantage::AlphaVantageAdapter;
pub use finnhub::FinnhubAdapter;
pub use yahoo::YahooAdapter;

use crate::data_source::SourceError;
use crate::Symbol;

/// Maps a non-2xx status to the error the fallback loop understands.
fn status_error(provider: &str, status: u16) -> SourceError {
    match status {
        429 => SourceError::rate_limited(format!("{provider} returned 429 Too Many Requests")),
        401 | 403 => SourceError::auth_expired(format!("{provider} rejected credentials ({status})")),
        404 => SourceError::not_found(format!("{provider} returned 404")),
        _ => SourceError::network(format!("{provider} returned status {status}")),
    }
}

/// Currency for providers that do not report one: USD for suffix-less
/// (US-listed) symbols, unknown otherwise.
fn us_listing_currency(symbol: &Symbol) -> Option<String> {
    match symbol.exchange_suffix() {
        None => Some(String::from("USD")),
        Some(_) => None,
    }
}
