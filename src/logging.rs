//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Logs go to stdout so containerized workers are captured by the runtime.
//!
//! This module provides:
//! - Console logging, plain or JSON
//! - Environment-based log level configuration
//! - Domain-specific structured logging macros (`log_task!`, `log_step!`, `log_worker!`)
//! - TTY-aware ANSI color output
//!
//! ## Level resolution
//!
//! 1. An explicit level passed to [`init_tracing_with`]
//! 2. `LOG_LEVEL`
//! 3. `RUST_LOG`
//! 4. The environment default (`REMOTE_MAKE_ENV` or `APP_ENV`; `production` logs at `info`,
//!    everything else at `debug`)

use std::io::IsTerminal;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize console logging from the environment
pub fn init_tracing() {
    init_tracing_with(LogFormat::Pretty, None);
}

/// Initialize console logging with an explicit format and optional level
///
/// Only the first call in a process has any effect. A subscriber installed by
/// someone else (a test harness, an embedding application) is left in place.
pub fn init_tracing_with(format: LogFormat, level: Option<&str>) {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = level
            .map(str::to_lowercase)
            .unwrap_or_else(|| get_log_level(&environment));
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let installed = match format {
            LogFormat::Pretty => {
                let console_layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(use_ansi)
                    .with_filter(EnvFilter::new(&log_level));
                tracing_subscriber::registry()
                    .with(console_layer)
                    .try_init()
                    .is_ok()
            }
            LogFormat::Json => {
                let json_layer = fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_filter(EnvFilter::new(&log_level));
                tracing_subscriber::registry()
                    .with(json_layer)
                    .try_init()
                    .is_ok()
            }
        };

        if installed {
            tracing::info!(
                environment = %environment,
                level = %log_level,
                format = ?format,
                ansi_colors = use_ansi,
                "Console logging initialized"
            );
        } else {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }
    });
}

/// Current environment name
fn get_environment() -> String {
    std::env::var("REMOTE_MAKE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Log level from environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }
    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }
    default_level(environment).to_string()
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log task operations
///
/// ```rust,ignore
/// log_task!(info, "Task started", task_id: task.id, steps: template.steps.len());
/// ```
#[macro_export]
macro_rules! log_task {
    // Full form with task_id
    ($level:ident, $operation:expr, task_id: $task_id:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            task_id = %$task_id,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
    // Simple form - just operation
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
    // Generic form with additional fields
    ($level:ident, $operation:expr, $($key:ident: $value:expr),+ $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
}

/// Log step operations
#[macro_export]
macro_rules! log_step {
    // Full form with step_id and task_id
    ($level:ident, $operation:expr, step_id: $step_id:expr, task_id: $task_id:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            step_id = %$step_id,
            task_id = %$task_id,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
    // Step without an owning task in scope
    ($level:ident, $operation:expr, step_id: $step_id:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            step_id = %$step_id,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
}

/// Log worker lifecycle operations
#[macro_export]
macro_rules! log_worker {
    ($level:ident, $operation:expr, worker_id: $worker_id:expr, backend: $backend:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            worker_id = %$worker_id,
            backend = %$backend,
            $($key = ?$value,)*
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{} ({})", $operation, $backend
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            timestamp = %chrono::Utc::now().to_rfc3339(),
            "{}", $operation
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_level("production"), "info");
        assert_eq!(default_level("development"), "debug");
        assert_eq!(default_level("test"), "debug");
        assert_eq!(default_level("staging"), "debug");
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing_with(LogFormat::Pretty, Some("warn"));
        init_tracing();
        let task_id = uuid::Uuid::new_v4();
        crate::log_task!(debug, "Idempotent init", task_id: task_id, attempt: 2);
        crate::log_step!(debug, "Step", step_id: task_id, task_id: task_id,);
        crate::log_worker!(debug, "Worker", worker_id: task_id, backend: "local", state: "scheduled");
    }
}
