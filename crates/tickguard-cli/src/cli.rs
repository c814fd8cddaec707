//! CLI argument definitions for Tickguard.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quote` | Look up the latest price for one or more symbols |
//! | `watch` | Poll symbols repeatedly, then print the health report |
//! | `sources` | List the configured sources and their rate limits |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON engine configuration file |
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings (stale prices) as errors |
//!
//! # Examples
//!
//! ```bash
//! tickguard quote AAPL MSFT --pretty
//! tickguard quote IREN.SW --refresh --deadline-ms 5000
//! tickguard watch AAPL --interval-secs 30 --rounds 10
//! RUST_LOG=tickguard_core=debug tickguard sources
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Tickguard - resilient multi-provider stock quotes
#[derive(Debug, Parser)]
#[command(
    name = "tickguard",
    author,
    version,
    about = "Resilient multi-provider stock quotes",
    long_about = "Tickguard fetches stock prices from several free market-data providers \
and routes around their failures:\n\
\n\
  • Ordered fallback across Yahoo, Alpha Vantage and Finnhub\n\
  • Per-provider circuit breakers and call spacing\n\
  • Plausibility checks on every price\n\
  • Cached prices served (flagged stale) when every provider is down\n\
\n\
API keys are read from TICKGUARD_ALPHAVANTAGE_API_KEY and TICKGUARD_FINNHUB_API_KEY."
)]
pub struct Cli {
    /// Engine configuration file (JSON). Environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text for terminal display.
    Table,
    /// Single JSON object output.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look up the latest price for one or more symbols.
    Quote(QuoteArgs),
    /// Poll symbols on an interval and report source health at the end.
    Watch(WatchArgs),
    /// List configured sources in priority order.
    Sources,
}

#[derive(Debug, Clone, Args)]
pub struct QuoteArgs {
    /// Ticker symbols, e.g. AAPL or IREN.SW.
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Bypass fresh cache entries and ask the sources again.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,

    /// Give up on a symbol after this many milliseconds.
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Seconds between polling rounds.
    #[arg(long, default_value_t = 60)]
    pub interval_secs: u64,

    /// Number of polling rounds.
    #[arg(long, default_value_t = 5)]
    pub rounds: u32,
}
