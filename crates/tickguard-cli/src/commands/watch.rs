use std::time::{Duration, Instant};

use serde::Serialize;
use tickguard_core::{Engine, HealthReport, QuoteOptions, QuoteOutcome, Symbol};
use tracing::info;

use crate::cli::WatchArgs;
use crate::error::CliError;

use super::{Report, ReportError};

#[derive(Debug, Serialize)]
struct WatchResponseData {
    rounds: u32,
    last: Vec<QuoteOutcome>,
    health: HealthReport,
}

/// Polls the symbols `rounds` times; only the final round's results are reported.
///
/// Every symbol must parse before the first round; polling a malformed
/// symbol would only repeat the same error.
pub async fn run(args: &WatchArgs, engine: &Engine) -> Result<Report, CliError> {
    check_symbols(&args.symbols)?;

    let started = Instant::now();
    let interval = Duration::from_secs(args.interval_secs);
    let rounds = args.rounds.max(1);

    let mut last = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    for round in 1..=rounds {
        if round > 1 {
            tokio::time::sleep(interval).await;
        }

        last.clear();
        warnings.clear();
        errors.clear();
        let results = engine
            .get_multiple_quotes(args.symbols.as_slice(), QuoteOptions::default())
            .await;
        for (symbol, result) in results {
            match result {
                Ok(outcome) => {
                    info!(round, symbol = %symbol, price = outcome.quote.price(), freshness = ?outcome.freshness, "polled");
                    warnings.extend(outcome.warnings.iter().map(|w| format!("{symbol}: {w}")));
                    last.push(outcome);
                }
                Err(error) => errors.push(ReportError::from_quote_error(&symbol, &error)),
            }
        }
    }

    let data = serde_json::to_value(WatchResponseData {
        rounds,
        last,
        health: engine.health_report().await,
    })?;
    Ok(Report::ok(data)
        .with_warnings(warnings)
        .with_errors(errors)
        .with_latency(started.elapsed().as_millis() as u64))
}

fn check_symbols(symbols: &[String]) -> Result<(), CliError> {
    for symbol in symbols {
        Symbol::parse(symbol)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_symbols_stop_the_watch_before_polling() {
        let symbols = vec!["AAPL".to_owned(), "bad symbol!".to_owned()];

        let error = check_symbols(&symbols).unwrap_err();

        assert!(matches!(error, CliError::Validation(_)));
        assert_eq!(error.exit_code(), 2);
        assert!(check_symbols(&["AAPL".to_owned(), "iren.sw".to_owned()]).is_ok());
    }
}
