//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber from [`LoggingConfig`]. `RUST_LOG` takes precedence
//! over the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{HandlerError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the global subscriber.
///
/// # Errors
/// `LoggingError` if the log file cannot be opened or a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let console_layer = config.log_to_console.then(|| {
        if config.json_format {
            fmt::layer().json().with_target(true).boxed()
        } else {
            fmt::layer().with_target(true).boxed()
        }
    });

    let file_layer = match (config.log_to_file, config.log_file_path.as_deref()) {
        (true, Some(path)) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| HandlerError::LoggingError(format!("Failed to open {path}: {e}")))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            Some(if config.json_format {
                layer.json().boxed()
            } else {
                layer.boxed()
            })
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| HandlerError::LoggingError(e.to_string()))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
