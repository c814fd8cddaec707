mod quote;
mod sources;
mod watch;

use serde::Serialize;
use serde_json::Value;
use tickguard_core::{ApiKeys, Engine, EngineConfig, QuoteError};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Everything a command wants printed, before formatting.
#[derive(Debug, Serialize)]
pub struct Report {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<ReportError>,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ReportError {
    pub code: &'static str,
    pub symbol: Option<String>,
    pub message: String,
}

impl ReportError {
    pub fn from_quote_error(symbol: &str, error: &QuoteError) -> Self {
        Self {
            code: error.code(),
            symbol: Some(symbol.to_owned()),
            message: error.to_string(),
        }
    }
}

impl Report {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_errors(mut self, errors: Vec<ReportError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Report, CliError> {
    let engine = build_engine(cli)?;

    match &cli.command {
        Command::Quote(args) => quote::run(args, &engine).await,
        Command::Watch(args) => watch::run(args, &engine).await,
        Command::Sources => sources::run(&engine),
    }
}

fn build_engine(cli: &Cli) -> Result<Engine, CliError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?.overlay_env()?,
        None => EngineConfig::from_env()?,
    };
    Ok(Engine::from_config(config, &ApiKeys::from_env())?)
}
