use serde::Serialize;
use tickguard_core::{Engine, ProviderId};

use crate::error::CliError;

use super::Report;

#[derive(Debug, Serialize)]
struct SourceEntry {
    priority: usize,
    source: ProviderId,
    calls_per_period: u32,
    period_secs: f64,
    min_interval_ms: u64,
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceEntry>,
}

pub fn run(engine: &Engine) -> Result<Report, CliError> {
    let config = engine.config();
    let sources = engine
        .priority_order()
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let limit = config.rate_limit_for(*source);
            SourceEntry {
                priority: index + 1,
                source: *source,
                calls_per_period: limit.calls_per_period,
                period_secs: limit.period.as_secs_f64(),
                min_interval_ms: limit.min_interval().as_millis() as u64,
            }
        })
        .collect();

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(Report::ok(data))
}
