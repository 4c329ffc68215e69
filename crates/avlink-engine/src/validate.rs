/*!
 * Parameter validation.
 *
 * Checks command arguments against the command's parameter schema before
 * anything is encoded. Validation is a pure function of the spec, the
 * arguments and the range policy in force.
 */
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use avlink_core::config::RangePolicy;
use avlink_core::types::Value;

use crate::error::{Error, Result, ValidationError};
use crate::schema::{CommandSpec, ParamKind, ParamSpec};

/// Arguments supplied by the host for one command
pub type Args = BTreeMap<String, Value>;

/// Arguments that passed validation, with defaults filled in
///
/// Numbers holding an integral value are stored as `Value::Integer`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidatedArgs(BTreeMap<String, Value>);

impl ValidatedArgs {
    /// Get a value by parameter name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether a parameter has a value
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Get a number as `f64`
    pub fn number(&self, name: &str) -> Result<f64> {
        self.get(name)
            .and_then(Value::as_float)
            .ok_or_else(|| Error::encoding(format!("no numeric value for '{}'", name)))
    }

    /// Get a number rounded to an integer
    pub fn integer(&self, name: &str) -> Result<i64> {
        self.number(name).map(|v| v.round() as i64)
    }

    /// Get a string
    pub fn string(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::encoding(format!("no string value for '{}'", name)))
    }

    /// Get a boolean
    pub fn boolean(&self, name: &str) -> Result<bool> {
        self.get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::encoding(format!("no boolean value for '{}'", name)))
    }

    /// Replace a value, used by encoding transforms
    pub(crate) fn set(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    /// Iterate over the values
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Consume into the underlying map
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

/// Validate `args` against `spec`
///
/// `default_policy` applies when the command does not declare its own range
/// policy. Arguments that the command does not declare are ignored.
pub fn validate(
    spec: &CommandSpec,
    args: &Args,
    default_policy: RangePolicy,
) -> std::result::Result<ValidatedArgs, ValidationError> {
    let policy = spec.range_policy.unwrap_or(default_policy);
    let mut validated = BTreeMap::new();

    for param in &spec.parameters {
        let supplied = args.get(&param.name).filter(|v| !v.is_null());

        let value = match (supplied, &param.default) {
            (Some(value), _) => value,
            (None, Some(default)) => default,
            (None, None) if param.required => {
                return Err(ValidationError::MissingRequiredParameter {
                    command: spec.name.clone(),
                    parameter: param.name.clone(),
                });
            }
            (None, None) => continue,
        };

        let checked = check_value(&spec.name, param, value, policy)?;
        validated.insert(param.name.clone(), checked);
    }

    for name in args.keys() {
        if spec.parameter(name).is_none() {
            trace!(command = %spec.name, argument = %name, "Ignoring undeclared argument");
        }
    }

    Ok(ValidatedArgs(validated))
}

fn check_value(
    command: &str,
    param: &ParamSpec,
    value: &Value,
    policy: RangePolicy,
) -> std::result::Result<Value, ValidationError> {
    let invalid_type = || ValidationError::InvalidType {
        command: command.to_string(),
        parameter: param.name.clone(),
        expected: param.kind,
        found: value.kind_name().to_string(),
    };

    match param.kind {
        ParamKind::Number => {
            let number = value
                .as_float()
                .filter(|v| v.is_finite())
                .ok_or_else(invalid_type)?;
            let number = check_range(command, param, number, policy)?;
            Ok(normalize_number(number))
        }
        ParamKind::String => {
            let s = value.as_str().ok_or_else(invalid_type)?;
            if let Some(allowed) = &param.allowed {
                if !allowed.iter().any(|a| a == s) {
                    return Err(ValidationError::InvalidEnumValue {
                        command: command.to_string(),
                        parameter: param.name.clone(),
                        value: s.to_string(),
                        allowed: allowed.clone(),
                    });
                }
            }
            Ok(Value::String(s.to_string()))
        }
        ParamKind::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Integer(0) => Ok(Value::Bool(false)),
            Value::Integer(1) => Ok(Value::Bool(true)),
            _ => Err(invalid_type()),
        },
    }
}

fn check_range(
    command: &str,
    param: &ParamSpec,
    value: f64,
    policy: RangePolicy,
) -> std::result::Result<f64, ValidationError> {
    let below = param.min.filter(|min| value < *min);
    let above = param.max.filter(|max| value > *max);

    match (below.or(above), policy) {
        (None, _) => Ok(value),
        (Some(bound), RangePolicy::Clamp) => {
            trace!(command, parameter = %param.name, value, bound, "Clamping out-of-range value");
            Ok(bound)
        }
        (Some(_), RangePolicy::Reject) => Err(ValidationError::OutOfRange {
            command: command.to_string(),
            parameter: param.name.clone(),
            value,
            min: param.min,
            max: param.max,
        }),
    }
}

fn normalize_number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::Integer(value as i64)
    } else {
        Value::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn level() -> CommandSpec {
        CommandSpec::text("SetLevel", "SL ${channel} ${value}\r")
            .param(ParamSpec::number("channel").required().range(1.0, 8.0))
            .param(ParamSpec::number("value").required().range(0.0, 100.0))
            .param(ParamSpec::string("mode").one_of(["fast", "slow"]))
            .param(ParamSpec::boolean("verify").with_default(false))
    }

    #[test]
    fn test_valid_arguments() {
        let validated = validate(
            &level(),
            &args! { "channel" => 3, "value" => 42.0, "mode" => "fast" },
            RangePolicy::Reject,
        )
        .unwrap();

        assert_eq!(validated.get("channel"), Some(&Value::Integer(3)));
        // Integral floats become integers
        assert_eq!(validated.get("value"), Some(&Value::Integer(42)));
        assert_eq!(validated.string("mode").unwrap(), "fast");
        assert_eq!(validated.get("verify"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&level(), &args! { "channel" => 1 }, RangePolicy::Reject).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingRequiredParameter {
                command: "SetLevel".to_string(),
                parameter: "value".to_string(),
            }
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = validate(
            &level(),
            &args! { "channel" => 1, "value" => Value::Null },
            RangePolicy::Reject,
        )
        .unwrap_err();
        assert_eq!(err.parameter(), "value");
    }

    #[test]
    fn test_bounds_are_inclusive() {
        for value in [0.0, 100.0] {
            assert!(validate(
                &level(),
                &args! { "channel" => 1, "value" => value },
                RangePolicy::Reject
            )
            .is_ok());
        }
    }

    #[test]
    fn test_out_of_range_reject() {
        let err = validate(
            &level(),
            &args! { "channel" => 1, "value" => 101 },
            RangePolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { value, .. } if value == 101.0));
    }

    #[test]
    fn test_out_of_range_clamp() {
        let validated = validate(
            &level(),
            &args! { "channel" => 0, "value" => 250.5 },
            RangePolicy::Clamp,
        )
        .unwrap();
        assert_eq!(validated.get("channel"), Some(&Value::Integer(1)));
        assert_eq!(validated.get("value"), Some(&Value::Integer(100)));
    }

    #[test]
    fn test_command_policy_overrides_default() {
        let spec = level().range_policy(RangePolicy::Clamp);
        let validated = validate(
            &spec,
            &args! { "channel" => 9, "value" => 1 },
            RangePolicy::Reject,
        )
        .unwrap();
        assert_eq!(validated.integer("channel").unwrap(), 8);
    }

    #[test]
    fn test_invalid_enum() {
        let err = validate(
            &level(),
            &args! { "channel" => 1, "value" => 1, "mode" => "medium" },
            RangePolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEnumValue { .. }));
    }

    #[test]
    fn test_invalid_type() {
        let err = validate(
            &level(),
            &args! { "channel" => "one", "value" => 1 },
            RangePolicy::Reject,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidType {
                command: "SetLevel".to_string(),
                parameter: "channel".to_string(),
                expected: ParamKind::Number,
                found: "string".to_string(),
            }
        );
    }

    #[test]
    fn test_boolean_accepts_zero_and_one() {
        let validated = validate(
            &level(),
            &args! { "channel" => 1, "value" => 1, "verify" => 1 },
            RangePolicy::Reject,
        )
        .unwrap();
        assert!(validated.boolean("verify").unwrap());

        let err = validate(
            &level(),
            &args! { "channel" => 1, "value" => 1, "verify" => 2 },
            RangePolicy::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidType { .. }));
    }

    #[test]
    fn test_undeclared_arguments_ignored() {
        let validated = validate(
            &level(),
            &args! { "channel" => 1, "value" => 1, "colour" => "red" },
            RangePolicy::Reject,
        )
        .unwrap();
        assert!(!validated.contains("colour"));
    }

    #[test]
    fn test_validation_is_pure() {
        let args = args! { "channel" => 2, "value" => 12.5 };
        let first = validate(&level(), &args, RangePolicy::Reject).unwrap();
        let second = validate(&level(), &args, RangePolicy::Reject).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("value"), Some(&Value::Float(12.5)));
    }
}
