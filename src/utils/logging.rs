use env_logger::{Builder, Target};
use log::{Level, LevelFilter, SetLoggerError};
use std::env;
use std::io::Write;

use crate::models::{OperationKind, SyncReport};

fn level_from_env(value: &str) -> LevelFilter {
    match value.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

pub fn init_logging() -> Result<(), SetLoggerError> {
    let env = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level = level_from_env(&env);

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
        builder.filter_module("tokio", LevelFilter::Info);
        builder.filter_module("sqlx", LevelFilter::Warn);
    }

    builder.filter_level(log_level).target(Target::Stdout).try_init()
}

pub fn log_error_with_context(error: &anyhow::Error, context: &str) {
    log::error!("[{}] {}", context, error);

    // Log chain of causes for better debugging
    let mut source = error.source();
    while let Some(err) = source {
        log::error!("  Caused by: {}", err);
        source = err.source();
    }
}

pub fn log_sync_pass(calendar: &str, report: &SyncReport, duration_ms: u64) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    log::info!(
        "[Sync] {}{}: {} created, {} updated, {} deleted, {} unchanged, {} adopted, {} failed in {}ms",
        calendar,
        mode,
        report.created,
        report.updated,
        report.deleted,
        report.unchanged,
        report.adopted,
        report.failed,
        duration_ms
    );
    if !report.diagnostics.is_empty() {
        log::warn!("[Sync] {}: {} diagnostics", calendar, report.diagnostics.len());
    }
}

pub fn log_operation_failure(kind: OperationKind, uid: &str, detail: &str) {
    log::warn!("[Store] {} failed for {}: {}", kind, uid, detail);
}

pub fn log_feed_fetch(source: &str, bytes: usize, duration_ms: u64) {
    log::debug!("[Feed] Fetched {} bytes from {} in {}ms", bytes, source, duration_ms);
}

pub fn log_state_write(records: usize, duration_ms: u64) {
    log::debug!("[State] Replaced snapshot with {} records in {}ms", records, duration_ms);
}
