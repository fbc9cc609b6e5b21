use env_logger::{Builder, Target};
use log::{Level, LevelFilter, SetLoggerError};
use std::env;
use std::io::Write;

pub fn parse_level(value: &str) -> LevelFilter {
    match value.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Installs the process logger. Calling it twice returns the `SetLoggerError`
/// from the second call rather than panicking.
pub fn init_logging() -> Result<(), SetLoggerError> {
    let log_level = parse_level(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));

    let mut builder = Builder::from_default_env();

    builder.format(|buf, record| {
        let timestamp = buf.timestamp();
        let target = record.target();
        let file = record.file().unwrap_or("unknown");
        let line = record.line().unwrap_or(0);

        match record.level() {
            Level::Info => writeln!(buf, "{} [INFO] [{}]: {}", timestamp, target, record.args()),
            level => writeln!(
                buf,
                "{} [{}] [{}:{}] {}: {}",
                timestamp,
                level,
                file,
                line,
                target,
                record.args()
            ),
        }
    });

    // Filter out noisy modules in production
    if env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string()) == "production" {
        builder.filter_module("reqwest", LevelFilter::Warn);
        builder.filter_module("hyper", LevelFilter::Warn);
        builder.filter_module("sqlx", LevelFilter::Warn);
    }

    builder
        .filter_level(log_level)
        .target(Target::Stdout)
        .try_init()
}

pub fn log_error_with_context(error: &anyhow::Error, context: &str) {
    log::error!("[{}] {}", context, error);

    for cause in error.chain().skip(1) {
        log::error!("  Caused by: {}", cause);
    }
}

pub fn log_network_error(operation: &str, error: &dyn std::error::Error) {
    log::warn!("[Network] {} failed: {}", operation, error);
}

pub fn log_calendar_sync(source: &str, events_count: usize, duration_ms: u64) {
    log::info!(
        "[Sync] Reconciled {} events with {} in {}ms",
        events_count,
        source,
        duration_ms
    );
}

pub fn log_database_operation(operation: &str, table: &str, rows: u64) {
    log::debug!("[Database] {} on table {} touched {} rows", operation, table, rows);
}

pub fn log_expansion(event_title: &str, occurrences: usize) {
    log::trace!("[Recurrence] '{}' expanded to {} occurrences", event_title, occurrences);
}
