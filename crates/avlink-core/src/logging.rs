/*!
 * Logging functionality for avlink.
 *
 * This module provides tracing setup and span helpers so that every driver
 * instance logs with the same structure.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "avlink_engine=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize the logging system from a logging configuration section
///
/// `RUST_LOG` still wins over the configured level when it is set.
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init()
    };

    result.map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a driver instance
///
/// # Arguments
///
/// * `driver` - The driver (profile) name
/// * `id` - An optional ID for the driver instance
pub fn driver_span(driver: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("driver", name = %driver, id = %id),
        None => tracing::info_span!("driver", name = %driver),
    }
}

/// Create a new span for an engine operation
///
/// # Arguments
///
/// * `name` - The name of the operation (e.g. "build_command", "on_data")
/// * `driver` - The driver performing the operation
pub fn operation_span(name: &str, driver: &str) -> Span {
    tracing::debug_span!("operation", name = %name, driver = %driver)
}
