/*!
 * avlink Engine
 *
 * The declarative protocol adapter engine: command schemas and validation,
 * payload encoding, stream splitting, response matching, pending-request
 * correlation and the per-device driver façade that ties them together.
 */

#![warn(missing_docs)]

// Re-export core types
pub use avlink_core::prelude;

// Re-export types from avlink_core for convenience
pub use avlink_core::config::{DriverSettings, RangePolicy};
pub use avlink_core::types::{Id, Value};

pub mod clock;
pub mod correlator;
pub mod driver;
pub mod encode;
pub mod error;
pub mod matcher;
pub mod scheduler;
pub mod schema;
pub mod split;
pub mod validate;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use correlator::{Candidate, Correlation, Correlator, Interpretation, PendingRequest};
pub use driver::{
    BuiltCommand, Description, Driver, DriverMetadata, DriverProfile, FollowUpRequest,
    TransportHint, TransportKind,
};
pub use encode::{
    BinaryLayout, ChecksumKind, ChecksumSpec, Endian, Payload, TextChecksum, Transform,
};
pub use error::{Error, Result, ValidationError};
pub use matcher::{Event, FieldKind, Fields, Pattern, ResponseRule, UnitMatch};
pub use scheduler::FollowUpScheduler;
pub use schema::{CommandSpec, CommandTable, Encoding, Expectation, FollowUp, ParamKind, ParamSpec};
pub use split::{ByteMatch, Framing, LineTerminator, ProtocolUnit, Splitter};
pub use validate::{validate, Args, ValidatedArgs};

/// avlink engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("avlink Engine {} initialized", VERSION);
    Ok(())
}

/// Build command arguments
///
/// ```
/// use avlink_engine::{args, Value};
///
/// let args = args! { "controller" => 5, "state" => true };
/// assert_eq!(args.get("controller"), Some(&Value::Integer(5)));
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::validate::Args::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::validate::Args::new();
        $(
            args.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        args
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_args_macro() {
        assert!(args! {}.is_empty());
        let args = args! { "name" => "Lobby", "level" => 2.5, };
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("level"), Some(&Value::Float(2.5)));
    }
}
