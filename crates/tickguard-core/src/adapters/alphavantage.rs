use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{status_error, us_listing_currency};
use crate::data_source::{FetchFuture, SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest, DEFAULT_TIMEOUT};
use crate::provider_policy::{HardQuota, ProviderPolicy};
use crate::throttling::QuotaGuard;
use crate::{ProviderId, RawQuote, Symbol};

const QUERY_URL: &str = "https://www.alphavantage.co/query";

/// Alpha Vantage `GLOBAL_QUOTE` adapter.
pub struct AlphaVantageAdapter {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    quota: Option<QuotaGuard>,
    timeout: Duration,
}

impl AlphaVantageAdapter {
    /// Adapter with the free-tier daily quota guard.
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            quota: ProviderPolicy::alphavantage_default()
                .hard_quota
                .map(QuotaGuard::new),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the local quota guard; `None` disables it.
    pub fn with_quota(mut self, quota: Option<HardQuota>) -> Self {
        self.quota = quota.map(QuotaGuard::new);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<RawQuote, SourceError> {
        if let Some(quota) = &self.quota {
            quota.try_acquire().map_err(|wait| {
                SourceError::rate_limited(format!(
                    "alphavantage quota exhausted; retry in {:.0}s",
                    wait.as_secs_f64()
                ))
            })?;
        }

        let endpoint = format!(
            "{QUERY_URL}?function=GLOBAL_QUOTE&symbol={}&apikey={}",
            urlencoding::encode(symbol.as_str()),
            urlencoding::encode(&self.api_key)
        );
        let request = HttpRequest::get(endpoint).with_timeout(self.timeout);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| e.into_source_error("alphavantage"))?;

        if !response.is_success() {
            return Err(status_error("alphavantage", response.status));
        }

        parse_quote_response(symbol, &response.body)
    }
}

impl SourceAdapter for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::AlphaVantage
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(self.fetch_quote(symbol))
    }
}

fn parse_quote_response(symbol: &Symbol, body: &str) -> Result<RawQuote, SourceError> {
    let response: AlphaVantageQuoteResponse = serde_json::from_str(body).map_err(|e| {
        SourceError::malformed(format!("failed to parse alphavantage response: {e}"))
    })?;

    // Throttled requests still answer 200, with an explanatory note instead of data.
    if let Some(note) = response.note.or(response.information) {
        return Err(SourceError::rate_limited(format!("alphavantage: {note}")));
    }
    if let Some(message) = response.error_message {
        return Err(SourceError::not_found(format!("alphavantage: {message}")));
    }

    let data = response
        .quote
        .filter(|data| data.price.is_some())
        .ok_or_else(|| SourceError::not_found(format!("alphavantage has no quote for '{symbol}'")))?;

    Ok(RawQuote {
        source: ProviderId::AlphaVantage,
        symbol: Some(data.symbol.unwrap_or_else(|| symbol.to_string())),
        price: parse_number("05. price", data.price.as_deref())?,
        currency: us_listing_currency(symbol),
        change: parse_number("09. change", data.change.as_deref())?,
        change_percent: parse_number(
            "10. change percent",
            data.change_percent.as_deref().map(|v| v.trim_end_matches('%')),
        )?,
        volume: data.volume.and_then(|v| v.trim().parse::<u64>().ok()),
        timestamp: None,
    })
}

fn parse_number(field: &str, value: Option<&str>) -> Result<Option<f64>, SourceError> {
    value
        .map(|raw| {
            raw.trim().parse::<f64>().map_err(|_| {
                SourceError::malformed(format!("alphavantage field '{field}' is not numeric: '{raw}'"))
            })
        })
        .transpose()
}

#[derive(Debug, Clone, Deserialize)]
struct AlphaVantageQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    quote: Option<AlphaVantageQuoteData>,
    #[serde(rename = "Note", default)]
    note: Option<String>,
    #[serde(rename = "Information", default)]
    information: Option<String>,
    #[serde(rename = "Error Message", default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AlphaVantageQuoteData {
    #[serde(rename = "01. symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "05. price", default)]
    price: Option<String>,
    #[serde(rename = "06. volume", default)]
    volume: Option<String>,
    #[serde(rename = "09. change", default)]
    change: Option<String>,
    #[serde(rename = "10. change percent", default)]
    change_percent: Option<String>,
}
