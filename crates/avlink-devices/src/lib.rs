/*!
 * avlink Devices
 *
 * Built-in vendor profiles for the avlink engine and the catalog that hands
 * out drivers by name.
 */

#![warn(missing_docs)]

// Re-export core types
pub use avlink_core::prelude;

pub mod catalog;
pub mod drivers;
pub mod error;

pub use catalog::{CatalogEvent, DriverCatalog};
pub use error::{Error, Result};

/// avlink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<()> {
    tracing::info!("avlink Devices {} initialized", VERSION);
    Ok(())
}

/// Names of the built-in driver profiles
pub fn builtin_drivers() -> Vec<&'static str> {
    drivers::BUILTIN.iter().map(|(name, _)| *name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_drivers() {
        let names = builtin_drivers();
        assert!(names.contains(&"visca-ptz"));
        assert!(names.contains(&"symetrix-radius"));
        assert_eq!(names.len(), 8);
    }
}
