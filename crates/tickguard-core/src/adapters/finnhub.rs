use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::{status_error, us_listing_currency};
use crate::data_source::{FetchFuture, SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest, DEFAULT_TIMEOUT};
use crate::{ProviderId, RawQuote, Symbol, UtcDateTime};

const QUOTE_URL: &str = "https://finnhub.io/api/v1/quote";

/// Finnhub `/quote` adapter.
///
/// Finnhub answers unknown symbols with an all-zero body rather than an
/// error; the zero price is passed through for the validator to reject.
pub struct FinnhubAdapter {
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    timeout: Duration,
}

impl FinnhubAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<RawQuote, SourceError> {
        let request = HttpRequest::get(format!(
            "{QUOTE_URL}?symbol={}",
            urlencoding::encode(symbol.as_str())
        ))
        .with_header("X-Finnhub-Token", self.api_key.as_str())
        .with_timeout(self.timeout);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| e.into_source_error("finnhub"))?;

        if !response.is_success() {
            return Err(status_error("finnhub", response.status));
        }

        let data: FinnhubQuote = serde_json::from_str(&response.body)
            .map_err(|e| SourceError::malformed(format!("failed to parse finnhub response: {e}")))?;

        Ok(RawQuote {
            source: ProviderId::Finnhub,
            symbol: Some(symbol.to_string()),
            price: data.current,
            currency: us_listing_currency(symbol),
            change: data.change,
            change_percent: data.change_percent,
            volume: None,
            timestamp: data
                .timestamp
                .filter(|t| *t > 0)
                .and_then(UtcDateTime::from_unix_seconds),
        })
    }
}

impl SourceAdapter for FinnhubAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Finnhub
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(self.fetch_quote(symbol))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FinnhubQuote {
    #[serde(rename = "c")]
    current: Option<f64>,
    #[serde(rename = "d")]
    change: Option<f64>,
    #[serde(rename = "dp")]
    change_percent: Option<f64>,
    #[serde(rename = "t")]
    timestamp: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{HttpError, ScriptedHttpClient};

    #[tokio::test]
    async fn sends_token_header_and_maps_fields() {
        let body = r#"{"c":212.48,"d":1.2,"dp":0.568,"h":213,"l":210,"o":211,"pc":211.28,"t":1717000000}"#;
        let http = Arc::new(ScriptedHttpClient::new().respond(200, body));
        let adapter = FinnhubAdapter::new(http.clone(), "fh-key");

        let raw = adapter.fetch(&Symbol::parse("AAPL").unwrap()).await.unwrap();

        assert_eq!(raw.price, Some(212.48));
        assert_eq!(raw.change_percent, Some(0.568));
        assert_eq!(raw.currency.as_deref(), Some("USD"));
        assert!(raw.timestamp.is_some());

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://finnhub.io/api/v1/quote?symbol=AAPL");
        assert_eq!(
            request.headers.get("x-finnhub-token").map(String::as_str),
            Some("fh-key")
        );
        assert!(!request.url.contains("fh-key"));
    }

    #[tokio::test]
    async fn unknown_symbol_passes_zero_price_through() {
        let body = r#"{"c":0,"d":null,"dp":null,"h":0,"l":0,"o":0,"pc":0,"t":0}"#;
        let http = Arc::new(ScriptedHttpClient::new().respond(200, body));
        let adapter = FinnhubAdapter::new(http, "fh-key");

        let raw = adapter.fetch(&Symbol::parse("NOPE").unwrap()).await.unwrap();

        assert_eq!(raw.price, Some(0.0));
        assert_eq!(raw.timestamp, None);
    }

    #[tokio::test]
    async fn rejected_key_is_auth_expired() {
        let http = Arc::new(ScriptedHttpClient::new().respond(401, r#"{"error":"Invalid API key."}"#));
        let adapter = FinnhubAdapter::new(http, "bad");

        let error = adapter.fetch(&Symbol::parse("AAPL").unwrap()).await.unwrap_err();

        assert_eq!(error.kind(), SourceErrorKind::AuthExpired);
    }

    #[tokio::test]
    async fn transport_timeout_is_classified() {
        let http = Arc::new(ScriptedHttpClient::new().fail(HttpError::timeout("10s elapsed")));
        let adapter = FinnhubAdapter::new(http, "fh-key");

        let error = adapter.fetch(&Symbol::parse("AAPL").unwrap()).await.unwrap_err();

        assert_eq!(error.kind(), SourceErrorKind::Timeout);
    }
}
