use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use super::status_error;
use crate::data_source::{FetchFuture, SourceAdapter, SourceError};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, DEFAULT_TIMEOUT};
use crate::{ProviderId, RawQuote, Symbol, UtcDateTime};

const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URLS: [&str; 2] = [
    "https://query1.finance.yahoo.com/v1/test/getcrumb",
    "https://query2.finance.yahoo.com/v1/test/getcrumb",
];
const QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";
const REFERER: &str = "https://finance.yahoo.com/";

/// Cookie/crumb session for Yahoo's unofficial API.
///
/// The cookie lives in the HTTP client's jar; only the crumb is tracked here.
#[derive(Debug)]
struct YahooSession {
    crumb: Mutex<Option<(String, Instant)>>,
    refresh: tokio::sync::Mutex<()>,
    ttl: Duration,
}

impl Default for YahooSession {
    fn default() -> Self {
        Self {
            crumb: Mutex::new(None),
            refresh: tokio::sync::Mutex::new(()),
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl YahooSession {
    fn cached(&self) -> Option<String> {
        self.lock_crumb()
            .as_ref()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < self.ttl)
            .map(|(crumb, _)| crumb.clone())
    }

    fn invalidate(&self) {
        *self.lock_crumb() = None;
    }

    async fn crumb(&self, http: &dyn HttpClient, timeout: Duration) -> Result<String, SourceError> {
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        // One refresh at a time; waiters reuse the winner's crumb.
        let _refreshing = self.refresh.lock().await;
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        let crumb = Self::fetch_crumb(http, timeout).await?;
        *self.lock_crumb() = Some((crumb.clone(), Instant::now()));
        debug!("yahoo session refreshed");
        Ok(crumb)
    }

    async fn fetch_crumb(http: &dyn HttpClient, timeout: Duration) -> Result<String, SourceError> {
        let cookie_request = HttpRequest::get(COOKIE_URL)
            .with_header("referer", REFERER)
            .with_timeout(timeout);
        // fc.yahoo.com answers 404 while still setting the session cookie.
        http.execute(cookie_request)
            .await
            .map_err(|e| e.into_source_error("yahoo"))?;

        for endpoint in CRUMB_URLS {
            let request = HttpRequest::get(endpoint)
                .with_header("referer", REFERER)
                .with_timeout(timeout);

            let response = match http.execute(request).await {
                Ok(response) => response,
                Err(error) => {
                    debug!(endpoint, error = %error, "yahoo crumb endpoint failed");
                    continue;
                }
            };

            if response.status == 429 {
                return Err(SourceError::rate_limited(
                    "yahoo rate limited while fetching crumb",
                ));
            }

            let body = response.body.trim();
            let plausible = response.is_success()
                && !body.is_empty()
                && body.len() < 100
                && !body.contains(' ')
                && !body.contains('<');
            if plausible {
                return Ok(body.to_owned());
            }
        }

        Err(SourceError::auth_expired(
            "failed to obtain yahoo crumb from all endpoints",
        ))
    }

    fn lock_crumb(&self) -> MutexGuard<'_, Option<(String, Instant)>> {
        self.crumb
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Yahoo Finance quote adapter.
pub struct YahooAdapter {
    http_client: Arc<dyn HttpClient>,
    session: YahooSession,
    timeout: Duration,
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            session: YahooSession::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request_quote(&self, symbol: &Symbol, crumb: &str) -> Result<HttpResponse, SourceError> {
        let endpoint = format!(
            "{QUOTE_URL}?symbols={}&crumb={}",
            urlencoding::encode(symbol.as_str()),
            urlencoding::encode(crumb)
        );
        let request = HttpRequest::get(endpoint)
            .with_header("referer", REFERER)
            .with_timeout(self.timeout);

        self.http_client
            .execute(request)
            .await
            .map_err(|e| e.into_source_error("yahoo"))
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<RawQuote, SourceError> {
        let http = self.http_client.as_ref();
        let crumb = self.session.crumb(http, self.timeout).await?;
        let mut response = self.request_quote(symbol, &crumb).await?;

        if response.status == 401 {
            debug!(symbol = %symbol, "yahoo session rejected, refreshing crumb");
            self.session.invalidate();
            let crumb = self.session.crumb(http, self.timeout).await?;
            response = self.request_quote(symbol, &crumb).await?;

            if response.status == 401 {
                self.session.invalidate();
                return Err(SourceError::auth_expired(
                    "yahoo rejected a freshly refreshed session",
                ));
            }
        }

        if !response.is_success() {
            return Err(status_error("yahoo", response.status));
        }

        parse_quote_response(symbol, &response.body)
    }
}

impl SourceAdapter for YahooAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Yahoo
    }

    fn fetch<'a>(&'a self, symbol: &'a Symbol) -> FetchFuture<'a> {
        Box::pin(self.fetch_quote(symbol))
    }
}

fn parse_quote_response(symbol: &Symbol, body: &str) -> Result<RawQuote, SourceError> {
    let response: YahooQuoteResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(format!("failed to parse yahoo response: {e}")))?;

    if let Some(error) = response.quote_response.error.filter(|e| !e.is_null()) {
        return Err(SourceError::malformed(format!("yahoo API error: {error}")));
    }

    let results = response.quote_response.result;
    let data = results
        .iter()
        .find(|quote| quote.symbol.eq_ignore_ascii_case(symbol.as_str()))
        .or_else(|| results.first())
        .ok_or_else(|| SourceError::not_found(format!("yahoo has no quote for '{symbol}'")))?;

    Ok(RawQuote {
        source: ProviderId::Yahoo,
        symbol: Some(data.symbol.clone()),
        price: data.regular_market_price,
        currency: data.currency.clone(),
        change: data.regular_market_change,
        change_percent: data.regular_market_change_percent,
        volume: data.regular_market_volume.map(|v| v.max(0) as u64),
        timestamp: data
            .regular_market_time
            .and_then(UtcDateTime::from_unix_seconds),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct YahooQuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: YahooQuoteResponseData,
}

#[derive(Debug, Clone, Deserialize)]
struct YahooQuoteResponseData {
    #[serde(default)]
    result: Vec<YahooQuoteData>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuoteData {
    symbol: String,
    regular_market_price: Option<f64>,
    regular_market_change: Option<f64>,
    regular_market_change_percent: Option<f64>,
    regular_market_volume: Option<i64>,
    regular_market_time: Option<i64>,
    currency: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::ScriptedHttpClient;

    const IREN_BODY: &str = r#"{"quoteResponse":{"result":[{"symbol":"IREN.SW","regularMarketPrice":127.3,"regularMarketChange":1.1,"regularMarketChangePercent":0.87,"regularMarketVolume":1200,"regularMarketTime":1717000000,"currency":"CHF"}],"error":null}}"#;

    fn session_script() -> ScriptedHttpClient {
        ScriptedHttpClient::new()
            .respond(404, "")
            .respond(200, "abc123crumb")
    }

    #[tokio::test]
    async fn fetches_crumb_then_quote() {
        let http = Arc::new(session_script().respond(200, IREN_BODY));
        let adapter = YahooAdapter::new(http.clone());
        let symbol = Symbol::parse("IREN.SW").unwrap();

        let raw = adapter.fetch(&symbol).await.unwrap();

        assert_eq!(raw.price, Some(127.3));
        assert_eq!(raw.currency.as_deref(), Some("CHF"));
        assert_eq!(raw.volume, Some(1200));
        assert_eq!(raw.timestamp.map(UtcDateTime::unix_seconds), Some(1_717_000_000));

        let requests = http.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].url.contains("symbols=IREN.SW"));
        assert!(requests[2].url.contains("crumb=abc123crumb"));
    }

    #[tokio::test]
    async fn reuses_crumb_across_calls() {
        let http = Arc::new(
            session_script()
                .respond(200, IREN_BODY)
                .respond(200, IREN_BODY),
        );
        let adapter = YahooAdapter::new(http.clone());
        let symbol = Symbol::parse("IREN.SW").unwrap();

        adapter.fetch(&symbol).await.unwrap();
        adapter.fetch(&symbol).await.unwrap();

        assert_eq!(http.request_count(), 4);
    }

    #[tokio::test]
    async fn refreshes_session_once_on_401() {
        let http = Arc::new(
            session_script()
                .respond(401, "")
                .respond(404, "")
                .respond(200, "freshcrumb")
                .respond(200, IREN_BODY),
        );
        let adapter = YahooAdapter::new(http.clone());
        let symbol = Symbol::parse("IREN.SW").unwrap();

        let raw = adapter.fetch(&symbol).await.unwrap();

        assert_eq!(raw.price, Some(127.3));
        assert!(http.requests()[5].url.contains("crumb=freshcrumb"));
    }

    #[tokio::test]
    async fn second_401_surfaces_auth_expired() {
        let http = Arc::new(
            session_script()
                .respond(401, "")
                .respond(404, "")
                .respond(200, "freshcrumb")
                .respond(401, ""),
        );
        let adapter = YahooAdapter::new(http);

        let error = adapter
            .fetch(&Symbol::parse("AAPL").unwrap())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), SourceErrorKind::AuthExpired);
    }

    #[tokio::test]
    async fn throttling_is_reported_as_rate_limited() {
        let http = Arc::new(session_script().respond(429, "Too Many Requests"));
        let adapter = YahooAdapter::new(http);

        let error = adapter
            .fetch(&Symbol::parse("AAPL").unwrap())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn empty_result_is_not_found() {
        let http = Arc::new(
            session_script().respond(200, r#"{"quoteResponse":{"result":[],"error":null}}"#),
        );
        let adapter = YahooAdapter::new(http);

        let error = adapter
            .fetch(&Symbol::parse("NOPE").unwrap())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn html_crumb_page_is_rejected() {
        let http = Arc::new(
            ScriptedHttpClient::new()
                .respond(404, "")
                .respond(200, "<html>consent</html>")
                .respond(200, "<!DOCTYPE html>"),
        );
        let adapter = YahooAdapter::new(http);

        let error = adapter
            .fetch(&Symbol::parse("AAPL").unwrap())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), SourceErrorKind::AuthExpired);
    }

    #[test]
    fn garbage_body_is_malformed() {
        let error = parse_quote_response(&Symbol::parse("AAPL").unwrap(), "not json").unwrap_err();
        assert_eq!(error.kind(), SourceErrorKind::Malformed);
    }
}
