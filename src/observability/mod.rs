pub mod token_counter;

use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
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

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Outcome summary of one external request.
#[derive(Debug, Clone, Copy)]
pub struct Completion<'a> {
    pub request_id: &'a str,
    pub model: &'a str,
    pub account_id: &'a str,
    pub attempts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub stream: bool,
}

/// Log a completed request, computing duration from start time.
pub fn log_request_complete(completion: &Completion<'_>, start_time: Instant) {
    token_counter::log_request_usage(completion, start_time.elapsed());
}
