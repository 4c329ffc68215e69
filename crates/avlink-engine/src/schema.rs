/*!
 * Command schemas.
 *
 * A driver's command table is static data: every command names its typed
 * parameters, how its payload is encoded, and optionally what kind of reply
 * it leaves pending and which query should follow it. Tables are built from
 * struct literals in code or loaded from TOML/JSON, and are checked once at
 * construction.
 */
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use avlink_core::config::RangePolicy;
use avlink_core::types::Value;

use crate::encode::{BinaryLayout, EncodeFn, TextChecksum, Transform};
use crate::error::{Error, Result};

/// Kind of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Integer or floating-point number
    Number,
    /// Free or enumerated string
    String,
    /// Boolean flag
    Boolean,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Number => write!(f, "number"),
            ParamKind::String => write!(f, "string"),
            ParamKind::Boolean => write!(f, "boolean"),
        }
    }
}

/// Declaration of one command parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,

    /// Parameter kind
    pub kind: ParamKind,

    /// Whether the parameter must be supplied
    #[serde(default)]
    pub required: bool,

    /// Inclusive lower bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Inclusive upper bound for numbers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Allowed values for strings
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,

    /// Value used when an optional parameter is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    fn new<S: Into<String>>(name: S, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            min: None,
            max: None,
            allowed: None,
            default: None,
            description: None,
        }
    }

    /// Declare a number parameter
    pub fn number<S: Into<String>>(name: S) -> Self {
        Self::new(name, ParamKind::Number)
    }

    /// Declare a string parameter
    pub fn string<S: Into<String>>(name: S) -> Self {
        Self::new(name, ParamKind::String)
    }

    /// Declare a boolean parameter
    pub fn boolean<S: Into<String>>(name: S) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    /// Mark the parameter as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set inclusive numeric bounds
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Restrict a string to a set of values
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the default value for an optional parameter
    pub fn with_default<V: Into<Value>>(mut self, value: V) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the description
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    fn check(&self, command: &str) -> Result<()> {
        if self.allowed.is_some() && self.kind != ParamKind::String {
            return Err(Error::configuration(format!(
                "{}: parameter '{}' declares an enum but is a {}",
                command, self.name, self.kind
            )));
        }

        if (self.min.is_some() || self.max.is_some()) && self.kind != ParamKind::Number {
            return Err(Error::configuration(format!(
                "{}: parameter '{}' declares bounds but is a {}",
                command, self.name, self.kind
            )));
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(Error::configuration(format!(
                    "{}: parameter '{}' has min {} above max {}",
                    command, self.name, min, max
                )));
            }
        }

        Ok(())
    }
}

/// How a command is rendered to a payload
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    /// Text template with `${name}` / `${name:fmt}` placeholders
    Text {
        /// Template, including any line terminator
        template: String,
        /// Optional checksum framing around the rendered text
        #[serde(default)]
        checksum: Option<TextChecksum>,
    },

    /// Fixed binary layout
    Binary(BinaryLayout),

    /// Encoder written in code
    #[serde(skip)]
    Custom(EncodeFn),
}

impl Encoding {
    /// Plain text template
    pub fn text<S: Into<String>>(template: S) -> Self {
        Encoding::Text {
            template: template.into(),
            checksum: None,
        }
    }

    /// Modbus-ASCII frame around a hex body template
    pub fn modbus_ascii<S: Into<String>>(body: S) -> Self {
        Encoding::Text {
            template: body.into(),
            checksum: Some(TextChecksum::ModbusLrc),
        }
    }

    /// Short label used in driver descriptions
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Text { checksum: None, .. } => "text",
            Encoding::Text { checksum: Some(_), .. } => "text+checksum",
            Encoding::Binary(_) => "binary",
            Encoding::Custom(_) => "custom",
        }
    }
}

/// Where the correlation key of a pending request comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKey {
    /// Value of a command parameter
    Param(String),
    /// A fixed key, for commands that address the whole device
    Fixed(String),
}

/// The reply a command leaves pending after it is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    /// Correlation key source
    pub key: CorrelationKey,
    /// Expected response shape
    pub shape: String,
}

impl Expectation {
    /// Expect `shape` keyed by the value of parameter `param`
    pub fn keyed_by<P: Into<String>, S: Into<String>>(param: P, shape: S) -> Self {
        Self {
            key: CorrelationKey::Param(param.into()),
            shape: shape.into(),
        }
    }

    /// Expect `shape` under a fixed key
    pub fn fixed<K: Into<String>, S: Into<String>>(key: K, shape: S) -> Self {
        Self {
            key: CorrelationKey::Fixed(key.into()),
            shape: shape.into(),
        }
    }
}

/// A deferred query scheduled after a command is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    /// Command to build when the delay expires
    pub command: String,

    /// Delay in milliseconds
    pub delay_ms: u64,

    /// Boolean parameter that must be true for the follow-up to be scheduled
    #[serde(default)]
    pub when_param: Option<String>,

    /// Number parameter overriding the delay
    #[serde(default)]
    pub delay_param: Option<String>,

    /// Lower bound applied to the delay
    #[serde(default)]
    pub min_delay_ms: u64,

    /// Parameters copied into the follow-up's arguments
    #[serde(default)]
    pub forward: Vec<String>,
}

impl FollowUp {
    /// Follow up with `command` after `delay_ms`
    pub fn new<S: Into<String>>(command: S, delay_ms: u64) -> Self {
        Self {
            command: command.into(),
            delay_ms,
            when_param: None,
            delay_param: None,
            min_delay_ms: 0,
            forward: Vec::new(),
        }
    }

    /// Only schedule when boolean parameter `param` is true
    pub fn when<S: Into<String>>(mut self, param: S) -> Self {
        self.when_param = Some(param.into());
        self
    }

    /// Take the delay from parameter `param`, never below `min_ms`
    pub fn delay_from<S: Into<String>>(mut self, param: S, min_ms: u64) -> Self {
        self.delay_param = Some(param.into());
        self.min_delay_ms = min_ms;
        self
    }

    /// Forward parameters to the follow-up command
    pub fn forwarding<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forward = params.into_iter().map(Into::into).collect();
        self
    }
}

/// Static declaration of one command
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    /// Unique command name
    pub name: String,

    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Declared parameters
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,

    /// Payload encoding
    pub encoding: Encoding,

    /// Per-parameter transforms applied before encoding
    #[serde(default)]
    pub transforms: BTreeMap<String, Transform>,

    /// Range policy overriding the driver setting
    #[serde(default)]
    pub range_policy: Option<RangePolicy>,

    /// Reply left pending once sent
    #[serde(default)]
    pub expects: Option<Expectation>,

    /// Deferred query
    #[serde(default)]
    pub follow_up: Option<FollowUp>,
}

impl CommandSpec {
    /// Create a command with the given encoding and no parameters
    pub fn new<S: Into<String>>(name: S, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            encoding,
            transforms: BTreeMap::new(),
            range_policy: None,
            expects: None,
            follow_up: None,
        }
    }

    /// Create a text command
    pub fn text<N: Into<String>, T: Into<String>>(name: N, template: T) -> Self {
        Self::new(name, Encoding::text(template))
    }

    /// Add a parameter
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    /// Set the description
    pub fn describe<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Apply a transform to a parameter before encoding
    pub fn transform<S: Into<String>>(mut self, param: S, transform: Transform) -> Self {
        self.transforms.insert(param.into(), transform);
        self
    }

    /// Override the range policy
    pub fn range_policy(mut self, policy: RangePolicy) -> Self {
        self.range_policy = Some(policy);
        self
    }

    /// Record a pending request when this command is sent
    pub fn expects(mut self, expectation: Expectation) -> Self {
        self.expects = Some(expectation);
        self
    }

    /// Schedule a deferred query after this command
    pub fn follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    /// Look up a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&ParamSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(Error::configuration(format!(
                    "{}: duplicate parameter '{}'",
                    self.name, param.name
                )));
            }
            param.check(&self.name)?;
        }

        if let Some(Expectation {
            key: CorrelationKey::Param(param),
            ..
        }) = &self.expects
        {
            if self.parameter(param).is_none() {
                return Err(Error::configuration(format!(
                    "{}: correlation key '{}' is not a parameter",
                    self.name, param
                )));
            }
        }

        if let Some(follow_up) = &self.follow_up {
            for name in follow_up
                .when_param
                .iter()
                .chain(follow_up.delay_param.iter())
                .chain(follow_up.forward.iter())
            {
                if self.parameter(name).is_none() {
                    return Err(Error::configuration(format!(
                        "{}: follow-up refers to unknown parameter '{}'",
                        self.name, name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// On-disk shape of a command table
#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    commands: Vec<CommandSpec>,
}

/// The checked set of commands a driver accepts
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: Vec<CommandSpec>,
    index: HashMap<String, usize>,
}

impl CommandTable {
    /// Build a table, checking names, parameters and cross references
    pub fn new(commands: Vec<CommandSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(commands.len());

        for (i, command) in commands.iter().enumerate() {
            if index.insert(command.name.clone(), i).is_some() {
                return Err(Error::configuration(format!(
                    "duplicate command '{}'",
                    command.name
                )));
            }
            command.check()?;
        }

        for command in &commands {
            if let Some(follow_up) = &command.follow_up {
                if !index.contains_key(&follow_up.command) {
                    return Err(Error::configuration(format!(
                        "{}: follow-up command '{}' does not exist",
                        command.name, follow_up.command
                    )));
                }
            }
        }

        Ok(Self { commands, index })
    }

    /// Load a table from TOML (`[[commands]]` entries)
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(s)?;
        Self::new(file.commands)
    }

    /// Load a table from JSON (`{"commands": [...]}`)
    pub fn from_json_str(s: &str) -> Result<Self> {
        let file: TableFile = serde_json::from_str(s)?;
        Self::new(file.commands)
    }

    /// Look up a command
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.index.get(name).map(|&i| &self.commands[i])
    }

    /// Iterate commands in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
