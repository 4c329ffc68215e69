/*!
 * Error types for the driver catalog.
 */
use thiserror::Error;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Catalog error
#[derive(Error, Debug)]
pub enum Error {
    /// No profile is registered under the name
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    /// A profile is already registered under the name
    #[error("Driver already registered: {0}")]
    DuplicateDriver(String),

    /// A profile failed to build
    #[error("Engine error: {0}")]
    Engine(#[from] avlink_engine::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an unknown driver error
    pub fn unknown_driver<S: AsRef<str>>(name: S) -> Self {
        Error::UnknownDriver(name.as_ref().to_string())
    }

    /// Create a generic error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }
}
