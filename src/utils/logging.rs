//! Structured logging bootstrap.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_logging`] once at startup.

use crate::config::LoggingConfig;
use crate::error::{constants, PresenceError, Result};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber configured from `config`.
///
/// `RUST_LOG` overrides the configured level when present.
///
/// # Errors
/// Returns [`PresenceError::ConfigError`] if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| {
        PresenceError::ConfigError(format!("{}: {e}", constants::ERR_SUBSCRIBER_INSTALL))
    })?;

    tracing::info!(app_name = %config.app_name, "Logging initialized");
    Ok(())
}
