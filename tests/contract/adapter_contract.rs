//! Contract tests every built-in adapter must satisfy, driven over a scripted
//! HTTP transport so no network access is needed.

use std::sync::Arc;

use tickguard_core::{
    AlphaVantageAdapter, ApiKeys, ConfigError, Engine, EngineConfig, FinnhubAdapter, HttpError,
    ProviderId, QuoteOptions, RawQuote, ScriptedHttpClient, SourceAdapter, SourceError,
    SourceErrorKind, Symbol, YahooAdapter,
};

const YAHOO_AAPL: &str = r#"{"quoteResponse":{"result":[{"symbol":"AAPL","regularMarketPrice":212.48,"regularMarketChangePercent":0.57,"regularMarketTime":1717000000,"currency":"USD"}],"error":null}}"#;
const ALPHA_AAPL: &str = r#"{"Global Quote":{"01. symbol":"AAPL","05. price":"212.4800","10. change percent":"0.5700%"}}"#;
const FINNHUB_AAPL: &str = r#"{"c":212.48,"d":1.2,"dp":0.57,"t":1717000000}"#;

/// Transport pre-loaded with whatever the adapter needs before the quote call.
fn transport(id: ProviderId) -> ScriptedHttpClient {
    match id {
        ProviderId::Yahoo => ScriptedHttpClient::new()
            .respond(404, "")
            .respond(200, "crumb-1"),
        ProviderId::AlphaVantage | ProviderId::Finnhub => ScriptedHttpClient::new(),
    }
}

fn adapter(id: ProviderId, http: Arc<ScriptedHttpClient>) -> Arc<dyn SourceAdapter> {
    match id {
        ProviderId::Yahoo => Arc::new(YahooAdapter::new(http)),
        ProviderId::AlphaVantage => Arc::new(AlphaVantageAdapter::new(http, "av-key").with_quota(None)),
        ProviderId::Finnhub => Arc::new(FinnhubAdapter::new(http, "fh-key")),
    }
}

fn happy_body(id: ProviderId) -> &'static str {
    match id {
        ProviderId::Yahoo => YAHOO_AAPL,
        ProviderId::AlphaVantage => ALPHA_AAPL,
        ProviderId::Finnhub => FINNHUB_AAPL,
    }
}

async fn fetch_after(id: ProviderId, status: u16, body: &str) -> Result<RawQuote, SourceError> {
    let http = Arc::new(transport(id).respond(status, body));
    adapter(id, http)
        .fetch(&Symbol::parse("AAPL").unwrap())
        .await
}

#[tokio::test]
async fn every_adapter_reports_its_own_id_and_the_provider_price() {
    for id in ProviderId::ALL {
        let raw = fetch_after(id, 200, happy_body(id))
            .await
            .unwrap_or_else(|error| panic!("{id} failed: {error}"));

        assert_eq!(raw.source, id);
        assert_eq!(raw.price, Some(212.48), "{id}");
        assert_eq!(raw.currency.as_deref(), Some("USD"), "{id}");
        assert!((raw.change_percent.unwrap() - 0.57).abs() < 1e-9, "{id}");
    }
}

#[tokio::test]
async fn every_adapter_maps_http_429_to_rate_limited() {
    for id in ProviderId::ALL {
        let error = fetch_after(id, 429, "Too Many Requests").await.unwrap_err();
        assert_eq!(error.kind(), SourceErrorKind::RateLimited, "{id}");
    }
}

#[tokio::test]
async fn every_adapter_maps_server_errors_to_network() {
    for id in ProviderId::ALL {
        let error = fetch_after(id, 503, "unavailable").await.unwrap_err();
        assert_eq!(error.kind(), SourceErrorKind::Network, "{id}");
    }
}

#[tokio::test]
async fn every_adapter_maps_unparseable_bodies_to_malformed() {
    for id in ProviderId::ALL {
        let error = fetch_after(id, 200, "<html>maintenance</html>")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), SourceErrorKind::Malformed, "{id}");
    }
}

#[tokio::test]
async fn every_adapter_maps_transport_timeouts_to_timeout() {
    for id in ProviderId::ALL {
        let http = Arc::new(ScriptedHttpClient::new().fail(HttpError::timeout("deadline elapsed")));
        let error = adapter(id, http)
            .fetch(&Symbol::parse("AAPL").unwrap())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), SourceErrorKind::Timeout, "{id}");
    }
}

#[tokio::test]
async fn engine_over_http_adapters_falls_back_and_skips_sources_without_keys() {
    // Given: no Alpha Vantage key, Yahoo down, Finnhub healthy
    let http = Arc::new(
        transport(ProviderId::Yahoo)
            .respond(503, "unavailable")
            .respond(200, FINNHUB_AAPL),
    );
    let keys = ApiKeys {
        alphavantage: None,
        finnhub: Some("fh-key".to_owned()),
    };
    let engine = Engine::from_config_with_http(EngineConfig::default(), &keys, http.clone())
        .expect("yahoo and finnhub remain");

    // When: a quote is requested
    let outcome = engine
        .get_quote("AAPL", QuoteOptions::default())
        .await
        .unwrap();

    // Then: the keyless source was dropped and Finnhub answered after Yahoo failed
    assert_eq!(engine.priority_order(), &[ProviderId::Yahoo, ProviderId::Finnhub]);
    assert_eq!(outcome.quote.source(), ProviderId::Finnhub);
    assert_eq!(outcome.quote.price(), 212.48);
    assert_eq!(http.request_count(), 4);
}

#[tokio::test]
async fn engine_without_any_usable_source_is_a_configuration_error() {
    let config = EngineConfig {
        adapter_priority_order: vec![ProviderId::AlphaVantage],
        ..EngineConfig::default()
    };

    let result = Engine::from_config_with_http(
        config,
        &ApiKeys {
            alphavantage: None,
            finnhub: None,
        },
        Arc::new(ScriptedHttpClient::new()),
    );

    assert!(matches!(result, Err(ConfigError::EmptyPriorityOrder)));
}
