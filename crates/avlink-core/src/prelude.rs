/*!
 * Prelude module for avlink Core.
 *
 * This module re-exports commonly used types and functions from the avlink Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, Value};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, DriverSettings, RangePolicy, SharedConfig};

// Re-export logging helpers
pub use crate::logging::{driver_span, operation_span};
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
