//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and to a JSON file,
//! plus helpers that emit uniform records for task and step lifecycle
//! operations.

use anyhow::Context;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Directory for JSON log files, `LIFECYCLE_LOG_DIR` or `./log`
fn log_directory() -> PathBuf {
    std::env::var("LIFECYCLE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("log"))
}

/// Console plus JSON file logging, levelled by deployment environment
///
/// Idempotent. Failure to set up the file output falls back to the console.
pub fn init_structured_logging() {
    init_structured_logging_in(&log_directory());
}

/// Same as [`init_structured_logging`] with JSON files written under `log_dir`
///
/// Only the first call in a process takes effect.
pub fn init_structured_logging_in(log_dir: &Path) {
    LOGGER_GUARD.get_or_init(|| match try_init(log_dir) {
        Ok(guard) => Some(guard),
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(default_level(&environment_name())))
                .try_init();
            tracing::warn!(error = %e, "File logging unavailable, using console only");
            None
        }
    });
}

fn try_init(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let environment = environment_name();
    let level = default_level(&environment);

    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let pid = process::id();
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let log_filename = format!("{environment}.{pid}.{timestamp}.log");
    let log_path: PathBuf = log_dir.join(&log_filename);

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console = fmt::layer()
        .compact()
        .with_target(false)
        .with_filter(env_filter(level));
    let json_file = fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_current_span(true)
        .with_thread_ids(true)
        .with_filter(env_filter(level));

    // An embedding service may already own the global subscriber
    if tracing_subscriber::registry()
        .with(console)
        .with(json_file)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed, keeping it");
    }

    tracing::info!(
        pid,
        environment = %environment,
        log_file = %log_path.display(),
        "📝 LOGGING: console and JSON file output ready"
    );

    Ok(guard)
}

/// `RUST_LOG` wins over the environment default
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn environment_name() -> String {
    std::env::var("LIFECYCLE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" | "staging" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_id: &str,
    task_type: Option<&str>,
    cluster_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        task_type = task_type,
        cluster_id = cluster_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    task_id: &str,
    step_name: &str,
    step_method: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = %task_id,
        step_name = %step_name,
        step_method = step_method,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_by_environment() {
        assert_eq!(default_level("production"), "info");
        assert_eq!(default_level("staging"), "info");
        assert_eq!(default_level("test"), "warn");
        assert_eq!(default_level("development"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_structured_logging_in(dir.path());
        init_structured_logging_in(dir.path());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_some());
        log_task_operation("submit", "t-1", Some("aws-CreateCluster"), None, "INIT", None);
        log_step_operation("claim", "t-1", "create", None, "RUNNING", None);
    }
}
