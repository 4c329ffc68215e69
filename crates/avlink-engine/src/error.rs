/*!
 * Error types for the avlink engine crate.
 *
 * Validation failures are kept in their own enum so that hosts can match on
 * them without digging through the wider engine error.
 */
use thiserror::Error;

use crate::schema::ParamKind;

/// Rejection of command arguments against a command's parameter schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required parameter is absent from the arguments
    #[error("{command}: missing required parameter '{parameter}'")]
    MissingRequiredParameter {
        /// Command name
        command: String,
        /// Parameter name
        parameter: String,
    },

    /// A number lies outside its declared inclusive bounds
    #[error("{command}: parameter '{parameter}' value {value} is outside [{}, {}]",
        .min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".to_string()),
        .max.map(|v| v.to_string()).unwrap_or_else(|| "inf".to_string()))]
    OutOfRange {
        /// Command name
        command: String,
        /// Parameter name
        parameter: String,
        /// Offending value
        value: f64,
        /// Lower bound
        min: Option<f64>,
        /// Upper bound
        max: Option<f64>,
    },

    /// A string is not one of the declared enum members
    #[error("{command}: parameter '{parameter}' value '{value}' is not one of {allowed:?}")]
    InvalidEnumValue {
        /// Command name
        command: String,
        /// Parameter name
        parameter: String,
        /// Offending value
        value: String,
        /// Allowed values
        allowed: Vec<String>,
    },

    /// A value does not have the declared kind
    #[error("{command}: parameter '{parameter}' expects a {expected}, got {found}")]
    InvalidType {
        /// Command name
        command: String,
        /// Parameter name
        parameter: String,
        /// Declared kind
        expected: ParamKind,
        /// Kind of the supplied value
        found: String,
    },
}

impl ValidationError {
    /// Name of the parameter the error refers to
    pub fn parameter(&self) -> &str {
        match self {
            ValidationError::MissingRequiredParameter { parameter, .. }
            | ValidationError::OutOfRange { parameter, .. }
            | ValidationError::InvalidEnumValue { parameter, .. }
            | ValidationError::InvalidType { parameter, .. } => parameter,
        }
    }
}

/// Error type for avlink engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// The driver has no command with this name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Arguments failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A validated command could not be rendered to a payload
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A command table or driver profile is inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A response pattern could not be compiled
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] avlink_core::error::Error),
}

/// Result type for avlink engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new unknown command error
    pub fn unknown_command<S: AsRef<str>>(name: S) -> Self {
        Error::UnknownCommand(name.as_ref().to_string())
    }

    /// Create a new encoding error
    pub fn encoding<S: AsRef<str>>(msg: S) -> Self {
        Error::Encoding(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        Error::Configuration(msg.as_ref().to_string())
    }

    /// Create a new pattern error
    pub fn pattern<S: AsRef<str>>(msg: S) -> Self {
        Error::Pattern(msg.as_ref().to_string())
    }

    /// Create a new serialization error
    pub fn serialization<S: AsRef<str>>(msg: S) -> Self {
        Error::Serialization(msg.as_ref().to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Pattern(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
