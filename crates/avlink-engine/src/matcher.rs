/*!
 * Response matching and extraction.
 *
 * Every response rule is tried against every complete unit, in declaration
 * order. A unit can carry more than one fact (an acknowledgement byte next to
 * a status value, say), so matching does not stop at the first rule that
 * fires; each rule extracts at most once per unit.
 */
use std::collections::BTreeMap;
use std::fmt;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, trace};

use avlink_core::types::Value;

use crate::correlator::Correlation;
use crate::error::{Error, Result};
use crate::split::ProtocolUnit;

/// Structured fields of a decoded response
pub type Fields = BTreeMap<String, Value>;

/// Extractor written in code; `None` means the rule does not apply
pub type ExtractFn = fn(&UnitMatch<'_>) -> Option<Fields>;

/// A fixed-length byte pattern; `None` positions match any byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteTemplate(Vec<Option<u8>>);

impl ByteTemplate {
    /// Create a template from positions
    pub fn new(bytes: Vec<Option<u8>>) -> Self {
        Self(bytes)
    }

    /// Parse a template such as `"FE 11 ?? ?? FC"`
    pub fn parse(s: &str) -> Result<Self> {
        s.split_whitespace()
            .map(|token| match token {
                "??" | "_" => Ok(None),
                hex => u8::from_str_radix(hex, 16)
                    .map(Some)
                    .map_err(|_| Error::pattern(format!("bad byte '{}' in template '{}'", hex, s))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Template length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the template is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `bytes` matches exactly
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() == self.0.len()
            && self
                .0
                .iter()
                .zip(bytes)
                .all(|(expected, actual)| expected.map_or(true, |e| e == *actual))
    }

    /// The bytes at wildcard positions
    fn wildcards<'a>(&'a self, bytes: &'a [u8]) -> impl Iterator<Item = u8> + 'a {
        self.0
            .iter()
            .zip(bytes)
            .filter(|(expected, _)| expected.is_none())
            .map(|(_, actual)| *actual)
    }
}

impl fmt::Display for ByteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match b {
                Some(b) => write!(f, "{:02X}", b)?,
                None => write!(f, "??")?,
            }
        }
        Ok(())
    }
}

/// Matcher over one protocol unit
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Regular expression over the unit's text
    Regex(Regex),
    /// Regular expression over the lowercase hex of the unit's bytes
    HexRegex(Regex),
    /// Byte template; wildcard bytes become capture groups 1..
    Bytes(ByteTemplate),
}

impl Pattern {
    /// Compile a text pattern
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Compile a pattern over hex-encoded frames
    pub fn hex_regex(pattern: &str) -> Result<Self> {
        Ok(Pattern::HexRegex(Regex::new(pattern)?))
    }

    /// Parse a byte template
    pub fn bytes(template: &str) -> Result<Self> {
        ByteTemplate::parse(template).map(Pattern::Bytes)
    }

    /// Human readable form of the pattern
    pub fn source(&self) -> String {
        match self {
            Pattern::Regex(re) => re.as_str().to_string(),
            Pattern::HexRegex(re) => format!("hex:{}", re.as_str()),
            Pattern::Bytes(template) => template.to_string(),
        }
    }

    /// Match the unit, returning its captures
    pub fn find<'a>(&self, unit: &'a ProtocolUnit) -> Option<UnitMatch<'a>> {
        match self {
            Pattern::Regex(re) => {
                let text = unit.text()?;
                let caps = re.captures(&text)?;
                Some(UnitMatch::from_captures(unit, re, &caps))
            }
            Pattern::HexRegex(re) => {
                let hex = unit.hex();
                let caps = re.captures(&hex)?;
                Some(UnitMatch::from_captures(unit, re, &caps))
            }
            Pattern::Bytes(template) => {
                let bytes = unit.bytes();
                if !template.matches(bytes) {
                    return None;
                }
                let mut groups = vec![Some(crate::encode::to_hex(bytes, false))];
                groups.extend(template.wildcards(bytes).map(|b| Some(format!("{:02x}", b))));
                Some(UnitMatch {
                    unit,
                    groups,
                    named: BTreeMap::new(),
                })
            }
        }
    }
}

/// A successful pattern match against one unit
#[derive(Debug, Clone)]
pub struct UnitMatch<'a> {
    unit: &'a ProtocolUnit,
    groups: Vec<Option<String>>,
    named: BTreeMap<String, String>,
}

impl<'a> UnitMatch<'a> {
    fn from_captures(unit: &'a ProtocolUnit, re: &Regex, caps: &Captures<'_>) -> Self {
        let groups = caps.iter().map(|m| m.map(|m| m.as_str().to_string())).collect();
        let named = re
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Self { unit, groups, named }
    }

    /// The matched unit
    pub fn unit(&self) -> &ProtocolUnit {
        self.unit
    }

    /// Raw bytes of the matched unit
    pub fn bytes(&self) -> &[u8] {
        self.unit.bytes()
    }

    /// Capture group by index; 0 is the whole match
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Capture group by name
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Capture group by reference
    pub fn capture(&self, group: &CaptureRef) -> Option<&str> {
        match group {
            CaptureRef::Name(name) => self.name(name),
            CaptureRef::Index(index) => self.group(*index),
        }
    }

    /// Parse a capture group as a decimal integer
    pub fn int(&self, index: usize) -> Option<i64> {
        self.group(index)?.parse().ok()
    }

    /// Parse a capture group as hex
    pub fn hex(&self, index: usize) -> Option<i64> {
        i64::from_str_radix(self.group(index)?, 16).ok()
    }
}

/// How a captured string becomes a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Kept as text
    String,
    /// Decimal integer
    Int,
    /// Decimal float
    Float,
    /// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
    Bool,
    /// Hex byte
    HexU8,
    /// Hex 16-bit word
    HexU16,
    /// Hex 16-bit word read as two's complement
    HexI16,
}

impl FieldKind {
    /// Parse a raw capture
    pub fn parse(&self, raw: &str) -> Option<Value> {
        match self {
            FieldKind::String => Some(Value::String(raw.to_string())),
            FieldKind::Int => raw.trim().parse::<i64>().ok().map(Value::Integer),
            FieldKind::Float => raw.trim().parse::<f64>().ok().map(Value::Float),
            FieldKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            FieldKind::HexU8 => u8::from_str_radix(raw, 16).ok().map(Value::from),
            FieldKind::HexU16 => u16::from_str_radix(raw, 16).ok().map(Value::from),
            FieldKind::HexI16 => u16::from_str_radix(raw, 16)
                .ok()
                .map(|v| Value::Integer(v as i16 as i64)),
        }
    }
}

/// Reference to a capture group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRef {
    /// Named group
    Name(String),
    /// Group by index
    Index(usize),
}

impl From<&str> for CaptureRef {
    fn from(name: &str) -> Self {
        CaptureRef::Name(name.to_string())
    }
}

impl From<usize> for CaptureRef {
    fn from(index: usize) -> Self {
        CaptureRef::Index(index)
    }
}

/// One declaratively extracted field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCapture {
    /// Output field name
    pub field: String,
    /// Source group
    pub group: CaptureRef,
    /// Conversion
    pub kind: FieldKind,
}

/// How a matched unit becomes fields
#[derive(Debug, Clone)]
pub enum Extract {
    /// Typed capture groups; a group that did not participate is left out,
    /// a group that fails to parse makes the rule not applicable
    Captures(Vec<FieldCapture>),
    /// Extractor written in code
    Custom(ExtractFn),
}

impl Extract {
    fn run(&self, rule: &str, found: &UnitMatch<'_>) -> Option<Fields> {
        match self {
            Extract::Custom(extract) => extract(found),
            Extract::Captures(captures) => {
                let mut fields = Fields::new();
                for capture in captures {
                    let Some(raw) = found.capture(&capture.group) else {
                        continue;
                    };
                    match capture.kind.parse(raw) {
                        Some(value) => {
                            fields.insert(capture.field.clone(), value);
                        }
                        None => {
                            debug!(rule, field = %capture.field, raw, "Capture did not parse");
                            return None;
                        }
                    }
                }
                Some(fields)
            }
        }
    }
}

/// A response pattern with its extractor
#[derive(Debug, Clone)]
pub struct ResponseRule {
    /// Rule identifier
    pub id: String,
    /// Type of the events this rule emits
    pub event_type: String,
    /// Human readable description
    pub description: Option<String>,
    /// Pattern
    pub pattern: Pattern,
    /// Extractor
    pub extract: Extract,
    /// Correlation with pending requests
    pub correlation: Option<Correlation>,
}

impl ResponseRule {
    /// Create a rule emitting events typed as its id
    pub fn new<S: Into<String>>(id: S, pattern: Pattern) -> Self {
        let id = id.into();
        Self {
            event_type: id.clone(),
            id,
            description: None,
            pattern,
            extract: Extract::Captures(Vec::new()),
            correlation: None,
        }
    }

    /// Set the event type
    pub fn emits<S: Into<String>>(mut self, event_type: S) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Set the description
    pub fn describe<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a typed capture
    pub fn capture<F, G>(mut self, field: F, group: G, kind: FieldKind) -> Self
    where
        F: Into<String>,
        G: Into<CaptureRef>,
    {
        let capture = FieldCapture {
            field: field.into(),
            group: group.into(),
            kind,
        };
        match &mut self.extract {
            Extract::Captures(captures) => captures.push(capture),
            Extract::Custom(_) => self.extract = Extract::Captures(vec![capture]),
        }
        self
    }

    /// Use an extractor written in code
    pub fn extract_with(mut self, extract: ExtractFn) -> Self {
        self.extract = Extract::Custom(extract);
        self
    }

    /// Correlate events of this rule with pending requests
    pub fn correlate(mut self, correlation: Correlation) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Match and extract once
    pub fn apply(&self, unit: &ProtocolUnit) -> Option<Fields> {
        let found = self.pattern.find(unit)?;
        let fields = self.extract.run(&self.id, &found);
        trace!(rule = %self.id, applicable = fields.is_some(), "Rule matched");
        fields
    }
}

/// Output of the engine, handed to the host runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A decoded device response
    Response {
        /// Event type
        event_type: String,
        /// Rule that produced it
        rule: String,
        /// Extracted fields
        fields: Fields,
    },

    /// A complete unit that no rule accounted for
    Unrecognized {
        /// The raw unit
        unit: ProtocolUnit,
    },

    /// A pending request was dropped unanswered
    RequestEvicted {
        /// Correlation key
        key: String,
        /// Shape that was expected
        expected: String,
        /// Command that created the request
        command: String,
        /// Age of the request when evicted
        age_ms: u64,
    },

    /// The splitter dropped bytes to regain frame alignment
    FrameResyncDiscard {
        /// Number of bytes dropped
        discarded: usize,
    },
}

impl Event {
    /// Create a response event
    pub fn response<T: Into<String>, R: Into<String>>(event_type: T, rule: R, fields: Fields) -> Self {
        Event::Response {
            event_type: event_type.into(),
            rule: rule.into(),
            fields,
        }
    }

    /// Event type name
    pub fn event_type(&self) -> &str {
        match self {
            Event::Response { event_type, .. } => event_type,
            Event::Unrecognized { .. } => "Unrecognized",
            Event::RequestEvicted { .. } => "RequestEvicted",
            Event::FrameResyncDiscard { .. } => "FrameResyncDiscard",
        }
    }

    /// Whether this is a response of the given type
    pub fn is(&self, event_type: &str) -> bool {
        matches!(self, Event::Response { event_type: t, .. } if t == event_type)
    }

    /// A field of a response event
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Event::Response { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// Fields of a response event
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Event::Response { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

/// Run every rule over one unit
///
/// Events follow rule order. A unit no rule accounts for yields a single
/// `Unrecognized` event.
pub fn match_unit(unit: &ProtocolUnit, rules: &[ResponseRule]) -> Vec<Event> {
    let mut events: Vec<Event> = rules
        .iter()
        .filter_map(|rule| {
            rule.apply(unit)
                .map(|fields| Event::response(&rule.event_type, &rule.id, fields))
        })
        .collect();

    if events.is_empty() {
        events.push(Event::Unrecognized { unit: unit.clone() });
    }

    events
}
