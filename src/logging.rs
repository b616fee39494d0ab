//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, when a log
//! directory is configured, to a JSON file for post-mortem analysis of
//! supervised runs.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console-only structured logging
pub fn init_structured_logging() {
    init_structured_logging_with_dir(None);
}

/// Initialize structured logging, adding a JSON file layer under `log_dir`
pub fn init_structured_logging_with_dir(log_dir: Option<&Path>) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let pid = process::id();

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(&log_level));

        let mut log_file: Option<PathBuf> = None;
        let file_layer = log_dir.and_then(|dir| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Failed to create log directory {}: {e}", dir.display());
                return None;
            }
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
            let file_name = format!("{environment}.{pid}.{timestamp}.log");
            log_file = Some(dir.join(&file_name));

            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // The writer must outlive every span for the life of the process
            std::mem::forget(guard);

            Some(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(&log_level)),
            )
        });

        let subscriber = tracing_subscriber::registry().with(console).with(file_layer);

        // An embedding host may already own the global subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = ?log_file,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("RUNFORGE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for run control operations
pub fn log_run_operation(
    operation: &str,
    run_id: Uuid,
    attempt: Option<u32>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_id = %run_id,
        attempt = attempt,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🏃 RUN_OPERATION"
    );
}

/// Log structured data for plugin execution operations
pub fn log_plugin_operation(
    operation: &str,
    plugin_name: &str,
    execution_id: Option<Uuid>,
    target_id: Option<Uuid>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        plugin_name = %plugin_name,
        execution_id = ?execution_id,
        target_id = ?target_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧩 PLUGIN_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
