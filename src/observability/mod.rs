use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::protocol::canonical::{CanonicalPayload, ProviderKind};
use crate::stream::StreamStats;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Logs go to stderr so stdout carries only deltas and payloads.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Log usage and counters for a completed fold at INFO level.
pub fn log_reconcile_complete(
    provider: ProviderKind,
    payload: &CanonicalPayload,
    stats: &StreamStats,
    duration: Duration,
) {
    let usage = payload.usage.unwrap_or_default();
    info!(
        provider = provider.as_str(),
        choices = payload.choices.len(),
        tool_calls = payload.tool_calls().count(),
        input_tokens = usage.input_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        total_tokens = usage.total().unwrap_or(0),
        units = stats.units,
        deltas = stats.deltas,
        ignored = stats.ignored,
        duration_seconds = duration.as_secs_f64(),
        "reconcile completed"
    );
}
