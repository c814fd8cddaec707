use std::io::Write;

use crate::cli::OutputFormat;
use crate::commands::Report;
use crate::error::CliError;

pub fn render<W: Write>(
    out: &mut W,
    report: &Report,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(report)?
            } else {
                serde_json::to_string(report)?
            };
            writeln!(out, "{payload}")?;
        }
        OutputFormat::Table => write!(out, "{}", render_table(report)?)?,
    }
    out.flush()?;

    Ok(())
}

fn render_table(report: &Report) -> Result<String, CliError> {
    let mut out = String::new();
    out.push_str(&format!("latency_ms  : {}\n", report.latency_ms));

    if !report.warnings.is_empty() {
        out.push_str("warnings:\n");
        for warning in &report.warnings {
            out.push_str(&format!("  - {warning}\n"));
        }
    }

    out.push_str("data:\n");
    for line in serde_json::to_string_pretty(&report.data)?.lines() {
        out.push_str(&format!("  {line}\n"));
    }

    if !report.errors.is_empty() {
        out.push_str("errors:\n");
        for error in &report.errors {
            match &error.symbol {
                Some(symbol) => out.push_str(&format!("  - {} [{symbol}]: {}\n", error.code, error.message)),
                None => out.push_str(&format!("  - {}: {}\n", error.code, error.message)),
            }
        }
    }

    Ok(out)
}
