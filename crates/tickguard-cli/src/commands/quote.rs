use std::time::{Duration, Instant};

use serde::Serialize;
use tickguard_core::{Engine, QuoteOptions, QuoteOutcome};

use crate::cli::QuoteArgs;
use crate::error::CliError;

use super::{Report, ReportError};

#[derive(Debug, Serialize)]
struct QuoteResponseData {
    quotes: Vec<QuoteOutcome>,
}

pub async fn run(args: &QuoteArgs, engine: &Engine) -> Result<Report, CliError> {
    let started = Instant::now();
    let options = options_for(args);

    let results = engine.get_multiple_quotes(args.symbols.as_slice(), options).await;

    let mut quotes = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    for (symbol, result) in results {
        match result {
            Ok(outcome) => {
                warnings.extend(
                    outcome
                        .warnings
                        .iter()
                        .map(|warning| format!("{symbol}: {warning}")),
                );
                quotes.push(outcome);
            }
            Err(error) => errors.push(ReportError::from_quote_error(&symbol, &error)),
        }
    }

    let data = serde_json::to_value(QuoteResponseData { quotes })?;
    Ok(Report::ok(data)
        .with_warnings(warnings)
        .with_errors(errors)
        .with_latency(started.elapsed().as_millis() as u64))
}

fn options_for(args: &QuoteArgs) -> QuoteOptions {
    let options = QuoteOptions {
        force_refresh: args.refresh,
        deadline: None,
    };
    match args.deadline_ms {
        Some(ms) => options.with_deadline(Duration::from_millis(ms)),
        None => options,
    }
}
