/*!
 * Payload encoding.
 *
 * Renders a validated command into the bytes that go on the wire. Text
 * protocols use `${name}` / `${name:fmt}` templates, binary protocols use an
 * ordered field layout with an optional one-byte checksum. Encoding never
 * looks at the clock or any other ambient state, so the same input always
 * yields the same payload.
 */
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use avlink_core::types::Value;

use crate::error::{Error, Result};
use crate::schema::{CommandSpec, Encoding};
use crate::validate::ValidatedArgs;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("Invalid placeholder regex"));

/// Encoder written in code, for layouts the declarative forms cannot express
pub type EncodeFn = fn(&ValidatedArgs) -> Result<Payload>;

/// Packs part of a binary frame from the validated arguments
pub type PackFn = fn(&ValidatedArgs) -> Result<Vec<u8>>;

/// An encoded command ready for the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// UTF-8 text, terminator included
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
}

impl Payload {
    /// The bytes to send
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }

    /// The text, for text payloads
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }

    /// Consume into bytes
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(s) => s.into_bytes(),
            Payload::Binary(b) => b,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => write!(f, "{}", s.escape_debug()),
            Payload::Binary(b) => write!(f, "{}", to_hex(b, true)),
        }
    }
}

/// A transform applied to a parameter value before it is formatted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    /// `round((value + offset) * scale)`
    Linear {
        /// Added before scaling
        #[serde(default)]
        offset: f64,
        /// Multiplier
        scale: f64,
    },

    /// Replace the value by a wire token, keyed by the value's display form
    Lookup {
        /// Value to token map
        table: BTreeMap<String, String>,
    },

    /// Add a constant to an integer, e.g. to go from 1-based to 0-based
    Offset {
        /// Amount to add
        by: i64,
    },
}

impl Transform {
    /// Scale dB or percent style values to integers
    pub fn linear(offset: f64, scale: f64) -> Self {
        Transform::Linear { offset, scale }
    }

    /// Map values to tokens
    pub fn lookup<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Transform::Lookup {
            table: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Shift integers by `by`
    pub fn offset(by: i64) -> Self {
        Transform::Offset { by }
    }

    fn apply(&self, name: &str, value: &Value) -> Result<Value> {
        match self {
            Transform::Linear { offset, scale } => {
                let v = value.as_float().ok_or_else(|| {
                    Error::encoding(format!("linear transform on non-numeric '{}'", name))
                })?;
                Ok(Value::Integer(((v + offset) * scale).round() as i64))
            }
            Transform::Lookup { table } => {
                let key = value.to_string();
                table
                    .get(&key)
                    .map(|token| Value::String(token.clone()))
                    .ok_or_else(|| {
                        Error::encoding(format!("no lookup entry for {} = {}", name, key))
                    })
            }
            Transform::Offset { by } => {
                let v = value.as_integer().ok_or_else(|| {
                    Error::encoding(format!("offset transform on non-integer '{}'", name))
                })?;
                Ok(Value::Integer(v + by))
            }
        }
    }
}

/// Checksum framing for text payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextChecksum {
    /// `:` + hex body + LRC (two uppercase hex digits) + CRLF
    ModbusLrc,
}

/// Byte order of multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// One field of a binary layout
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BinaryField {
    /// Constant bytes
    Const {
        /// The bytes
        bytes: Vec<u8>,
    },
    /// Parameter as one unsigned byte
    U8 {
        /// Parameter name
        param: String,
    },
    /// Parameter as an unsigned 16-bit word
    U16 {
        /// Parameter name
        param: String,
        /// Byte order
        endian: Endian,
    },
    /// Parameter as a signed 16-bit word
    I16 {
        /// Parameter name
        param: String,
        /// Byte order
        endian: Endian,
    },
    /// Parameter as a 16-bit word spread over four bytes, one nibble each
    Nibbles16 {
        /// Parameter name
        param: String,
    },
    /// Bytes produced in code
    #[serde(skip)]
    Custom(PackFn),
}

/// One-byte checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Truncated sum
    Sum8,
    /// Two's complement of the truncated sum
    Lrc8,
    /// Exclusive or
    Xor8,
}

impl ChecksumKind {
    /// Compute the checksum over `bytes`
    pub fn compute<I: IntoIterator<Item = u8>>(&self, bytes: I) -> u8 {
        let bytes = bytes.into_iter();
        match self {
            ChecksumKind::Sum8 => bytes.fold(0u8, |acc, b| acc.wrapping_add(b)),
            ChecksumKind::Lrc8 => bytes.fold(0u8, |acc, b| acc.wrapping_add(b)).wrapping_neg(),
            ChecksumKind::Xor8 => bytes.fold(0u8, |acc, b| acc ^ b),
        }
    }
}

/// Where the checksum byte goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPosition {
    /// After the last field
    Append,
    /// Overwrites the byte at this index
    At(usize),
}

/// Checksum placement for a binary layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSpec {
    /// Algorithm
    pub kind: ChecksumKind,
    /// Placement
    pub position: ChecksumPosition,
    /// First byte covered by the checksum
    #[serde(default)]
    pub start: usize,
}

impl ChecksumSpec {
    /// Checksum appended after all fields
    pub fn append(kind: ChecksumKind) -> Self {
        Self {
            kind,
            position: ChecksumPosition::Append,
            start: 0,
        }
    }

    /// Checksum written at `index`, covering every other byte
    pub fn at(kind: ChecksumKind, index: usize) -> Self {
        Self {
            kind,
            position: ChecksumPosition::At(index),
            start: 0,
        }
    }

    /// Skip the first `start` bytes when computing
    pub fn starting_at(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    fn apply(&self, frame: &mut Vec<u8>) -> Result<()> {
        if self.start > frame.len() {
            return Err(Error::encoding(format!(
                "checksum start {} beyond frame length {}",
                self.start,
                frame.len()
            )));
        }

        match self.position {
            ChecksumPosition::Append => {
                let sum = self.kind.compute(frame[self.start..].iter().copied());
                frame.push(sum);
            }
            ChecksumPosition::At(index) => {
                if index >= frame.len() {
                    return Err(Error::encoding(format!(
                        "checksum index {} beyond frame length {}",
                        index,
                        frame.len()
                    )));
                }
                let sum = self.kind.compute(
                    frame
                        .iter()
                        .enumerate()
                        .skip(self.start)
                        .filter(|(i, _)| *i != index)
                        .map(|(_, b)| *b),
                );
                frame[index] = sum;
            }
        }

        Ok(())
    }
}

/// Ordered fields of a binary frame plus its checksum
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinaryLayout {
    /// Fields in wire order
    pub fields: Vec<BinaryField>,
    /// Optional checksum
    #[serde(default)]
    pub checksum: Option<ChecksumSpec>,
}

impl BinaryLayout {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Append constant bytes
    pub fn constant(mut self, bytes: &[u8]) -> Self {
        self.fields.push(BinaryField::Const {
            bytes: bytes.to_vec(),
        });
        self
    }

    /// Append a one-byte parameter
    pub fn u8<S: Into<String>>(mut self, param: S) -> Self {
        self.fields.push(BinaryField::U8 {
            param: param.into(),
        });
        self
    }

    /// Append an unsigned 16-bit parameter
    pub fn u16<S: Into<String>>(mut self, param: S, endian: Endian) -> Self {
        self.fields.push(BinaryField::U16 {
            param: param.into(),
            endian,
        });
        self
    }

    /// Append a signed 16-bit parameter
    pub fn i16<S: Into<String>>(mut self, param: S, endian: Endian) -> Self {
        self.fields.push(BinaryField::I16 {
            param: param.into(),
            endian,
        });
        self
    }

    /// Append a 16-bit parameter as four nibbles
    pub fn nibbles16<S: Into<String>>(mut self, param: S) -> Self {
        self.fields.push(BinaryField::Nibbles16 {
            param: param.into(),
        });
        self
    }

    /// Append bytes produced by `pack`
    pub fn custom(mut self, pack: PackFn) -> Self {
        self.fields.push(BinaryField::Custom(pack));
        self
    }

    /// Set the checksum
    pub fn with_checksum(mut self, checksum: ChecksumSpec) -> Self {
        self.checksum = Some(checksum);
        self
    }

    fn render(&self, args: &ValidatedArgs) -> Result<Vec<u8>> {
        let mut frame = Vec::new();

        for field in &self.fields {
            match field {
                BinaryField::Const { bytes } => frame.extend_from_slice(bytes),
                BinaryField::U8 { param } => {
                    let v = args.integer(param)?;
                    frame.push(narrow::<u8>(param, v)?);
                }
                BinaryField::U16 { param, endian } => {
                    let v = narrow::<u16>(param, args.integer(param)?)?;
                    frame.extend_from_slice(&match endian {
                        Endian::Little => v.to_le_bytes(),
                        Endian::Big => v.to_be_bytes(),
                    });
                }
                BinaryField::I16 { param, endian } => {
                    let v = narrow::<i16>(param, args.integer(param)?)?;
                    frame.extend_from_slice(&match endian {
                        Endian::Little => v.to_le_bytes(),
                        Endian::Big => v.to_be_bytes(),
                    });
                }
                BinaryField::Nibbles16 { param } => {
                    let v = args.integer(param)?;
                    if !(i16::MIN as i64..=u16::MAX as i64).contains(&v) {
                        return Err(Error::encoding(format!(
                            "{} = {} does not fit in 16 bits",
                            param, v
                        )));
                    }
                    let word = (v & 0xFFFF) as u16;
                    frame.extend_from_slice(&[
                        ((word >> 12) & 0x0F) as u8,
                        ((word >> 8) & 0x0F) as u8,
                        ((word >> 4) & 0x0F) as u8,
                        (word & 0x0F) as u8,
                    ]);
                }
                BinaryField::Custom(pack) => frame.extend(pack(args)?),
            }
        }

        if let Some(checksum) = &self.checksum {
            checksum.apply(&mut frame)?;
        }

        Ok(frame)
    }
}

fn narrow<T: TryFrom<i64>>(param: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        Error::encoding(format!(
            "{} = {} does not fit in {}",
            param,
            value,
            std::any::type_name::<T>()
        ))
    })
}

/// Encode a validated command
pub fn encode(spec: &CommandSpec, validated: &ValidatedArgs) -> Result<Payload> {
    let mut args = validated.clone();
    for (name, transform) in &spec.transforms {
        if let Some(value) = validated.get(name) {
            args.set(name, transform.apply(name, value)?);
        }
    }

    match &spec.encoding {
        Encoding::Text { template, checksum } => {
            let text = render_template(template, &args)?;
            match checksum {
                None => Ok(Payload::Text(text)),
                Some(TextChecksum::ModbusLrc) => Ok(Payload::Text(modbus_ascii_frame(&text)?)),
            }
        }
        Encoding::Binary(layout) => layout.render(&args).map(Payload::Binary),
        Encoding::Custom(encode_fn) => encode_fn(&args),
    }
}

/// Substitute `${name}` and `${name:fmt}` placeholders
pub fn render_template(template: &str, args: &ValidatedArgs) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let (name, format) = match inner.as_str().split_once(':') {
            Some((name, format)) => (name, Some(format)),
            None => (inner.as_str(), None),
        };
        let value = args.get(name).ok_or_else(|| {
            Error::encoding(format!("template placeholder '{}' has no value", name))
        })?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(&format_value(value, format)?);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

/// Format one value
///
/// Formats: `d`, `0Nd`, `x`, `X`, `0Nx`, `0NX`, `.Nf`. Negative values in a
/// hex format of width N are written as N-digit two's complement.
pub fn format_value(value: &Value, format: Option<&str>) -> Result<String> {
    let Some(format) = format else {
        return match value {
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::encoding(format!(
                "cannot render a {} into text",
                other.kind_name()
            ))),
        };
    };

    let number = match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_float(),
    }
    .ok_or_else(|| {
        Error::encoding(format!(
            "format '{}' needs a number, got {}",
            format,
            value.kind_name()
        ))
    })?;

    if let Some(precision) = format.strip_prefix('.').and_then(|f| f.strip_suffix('f')) {
        let precision = parse_width(precision, format)?;
        return Ok(format!("{:.*}", precision, number));
    }

    let int_val = number.round() as i64;

    if let Some(width) = format.strip_suffix('d') {
        let width = parse_width(width, format)?;
        return Ok(format!("{:0width$}", int_val, width = width));
    }

    let upper = format.ends_with('X');
    if let Some(width) = format.strip_suffix('x').or_else(|| format.strip_suffix('X')) {
        let width = parse_width(width, format)?;
        let uint_val = if int_val >= 0 {
            int_val as u64
        } else if width > 0 && width < 16 {
            (int_val as u64) & ((1u64 << (4 * width)) - 1)
        } else {
            (int_val as i32) as u32 as u64
        };
        return Ok(if upper {
            format!("{:0width$X}", uint_val, width = width)
        } else {
            format!("{:0width$x}", uint_val, width = width)
        });
    }

    Err(Error::encoding(format!("unknown format specifier '{}'", format)))
}

fn parse_width(digits: &str, format: &str) -> Result<usize> {
    if digits.is_empty() {
        return Ok(0);
    }
    digits
        .parse()
        .map_err(|_| Error::encoding(format!("bad width in format specifier '{}'", format)))
}

/// Wrap a hex body into a Modbus-ASCII frame
pub fn modbus_ascii_frame(body: &str) -> Result<String> {
    let bytes = from_hex(body)?;
    Ok(format!(":{}{:02X}\r\n", body, ChecksumKind::Lrc8.compute(bytes)))
}

/// Decode an even-length hex string
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::encoding(format!("odd-length hex string '{}'", s)));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::encoding(format!("invalid hex string '{}'", s)))
        })
        .collect()
}

/// Render bytes as hex, uppercase and space separated or lowercase and packed
pub fn to_hex(bytes: &[u8], spaced: bool) -> String {
    if spaced {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::schema::ParamSpec;
    use crate::validate::validate;
    use avlink_core::config::RangePolicy;

    fn encode_with(spec: &CommandSpec, args: crate::validate::Args) -> Result<Payload> {
        let validated = validate(spec, &args, RangePolicy::Reject)?;
        encode(spec, &validated)
    }

    #[test]
    fn test_plain_template() {
        let spec = CommandSpec::text("Recall", "LP ${preset}\r")
            .param(ParamSpec::number("preset").required());
        let payload = encode_with(&spec, args! { "preset" => 12 }).unwrap();
        assert_eq!(payload, Payload::Text("LP 12\r".to_string()));
    }

    #[test]
    fn test_formats() {
        assert_eq!(format_value(&Value::Integer(3), Some("02d")).unwrap(), "03");
        assert_eq!(format_value(&Value::Integer(7), Some("d")).unwrap(), "7");
        assert_eq!(format_value(&Value::Integer(255), Some("X")).unwrap(), "FF");
        assert_eq!(format_value(&Value::Integer(10), Some("04x")).unwrap(), "000a");
        assert_eq!(format_value(&Value::Integer(-1), Some("04X")).unwrap(), "FFFF");
        assert_eq!(format_value(&Value::Integer(-2), Some("02X")).unwrap(), "FE");
        assert_eq!(format_value(&Value::Float(1.5), Some(".2f")).unwrap(), "1.50");
        assert_eq!(format_value(&Value::Float(2.6), Some("d")).unwrap(), "3");
        assert_eq!(format_value(&Value::Bool(true), None).unwrap(), "1");
        assert!(format_value(&Value::Integer(1), Some("q")).is_err());
        assert!(format_value(&Value::String("a".into()), Some("d")).is_err());
    }

    #[test]
    fn test_db_scaling() {
        let spec = CommandSpec::text("SetGain", "SG ${group},${level:X}\r")
            .param(ParamSpec::number("group").required())
            .param(ParamSpec::number("level").required().range(-60.0, 12.0))
            .transform("level", Transform::linear(60.0, 2.0));

        let payload = encode_with(&spec, args! { "group" => 1, "level" => -10.5 }).unwrap();
        // round((-10.5 + 60) * 2) = 99 = 0x63
        assert_eq!(payload.as_text(), Some("SG 1,63\r"));
    }

    #[test]
    fn test_lookup_and_offset() {
        let spec = CommandSpec::text("Mute", "CS ${controller} ${state}\r")
            .param(ParamSpec::number("controller").required())
            .param(ParamSpec::boolean("state").required())
            .transform("state", Transform::lookup([("true", "65535"), ("false", "0")]))
            .transform("controller", Transform::offset(-1));

        let payload = encode_with(&spec, args! { "controller" => 5, "state" => true }).unwrap();
        assert_eq!(payload.as_text(), Some("CS 4 65535\r"));
    }

    #[test]
    fn test_missing_placeholder_value() {
        let spec = CommandSpec::text("Select", "sw p${port:02d}\r\n").param(ParamSpec::number("port"));
        assert!(matches!(encode_with(&spec, args! {}), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_modbus_lrc_reference() {
        // Read one holding register from slave 1
        assert_eq!(modbus_ascii_frame("010300000001").unwrap(), ":010300000001FB\r\n");
        assert_eq!(modbus_ascii_frame("0122").unwrap(), ":0122DD\r\n");
        assert!(modbus_ascii_frame("012").is_err());
        assert!(modbus_ascii_frame("01ZZ").is_err());
    }

    #[test]
    fn test_modbus_template() {
        let spec = CommandSpec::new("Recall", Encoding::modbus_ascii("01${function:02X}${preset:02X}"))
            .param(ParamSpec::number("function").with_default(0x22))
            .param(ParamSpec::number("preset").required().range(0.0, 15.0));

        let payload = encode_with(&spec, args! { "preset" => 3 }).unwrap();
        // 0x01 + 0x22 + 0x03 = 0x26, LRC = 0xDA
        assert_eq!(payload.as_text(), Some(":012203DA\r\n"));
    }

    #[test]
    fn test_binary_layout_with_indexed_checksum() {
        let layout = BinaryLayout::new()
            .constant(&[0xB3, 0x21, 0x00, 0x00, 0x2B, 0x01, 0x01, 0x00])
            .u8("channel")
            .constant(&[0x00])
            .i16("gain", Endian::Little)
            .with_checksum(ChecksumSpec::at(ChecksumKind::Sum8, 2));
        let spec = CommandSpec::new("Gain", Encoding::Binary(layout))
            .param(ParamSpec::number("channel").required().range(0.0, 15.0))
            .param(ParamSpec::number("gain").required())
            .transform("gain", Transform::linear(0.0, 100.0));

        let payload = encode_with(&spec, args! { "channel" => 2, "gain" => -3.5 }).unwrap();
        let bytes = payload.as_bytes();
        assert_eq!(bytes.len(), 12);
        // -350 as little-endian i16
        assert_eq!(&bytes[10..], &[0xA2, 0xFE]);
        let expected = bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 2)
            .fold(0u8, |acc, (_, b)| acc.wrapping_add(*b));
        assert_eq!(bytes[2], expected);
    }

    #[test]
    fn test_appended_checksum_from_offset() {
        let layout = BinaryLayout::new()
            .constant(&[0xAA, 0x01])
            .u16("value", Endian::Big)
            .with_checksum(ChecksumSpec::append(ChecksumKind::Xor8).starting_at(1));
        let spec = CommandSpec::new("Set", Encoding::Binary(layout))
            .param(ParamSpec::number("value").required());

        let payload = encode_with(&spec, args! { "value" => 0x1234 }).unwrap();
        assert_eq!(payload.as_bytes(), &[0xAA, 0x01, 0x12, 0x34, 0x01 ^ 0x12 ^ 0x34]);
    }

    #[test]
    fn test_nibbles_and_overflow() {
        let layout = BinaryLayout::new().constant(&[0x81]).nibbles16("pan").constant(&[0xFF]);
        let spec = CommandSpec::new("Pan", Encoding::Binary(layout)).param(ParamSpec::number("pan"));

        let payload = encode_with(&spec, args! { "pan" => -2 }).unwrap();
        assert_eq!(payload.as_bytes(), &[0x81, 0x0F, 0x0F, 0x0F, 0x0E, 0xFF]);

        let layout = BinaryLayout::new().u8("value");
        let spec = CommandSpec::new("Byte", Encoding::Binary(layout)).param(ParamSpec::number("value"));
        assert!(matches!(
            encode_with(&spec, args! { "value" => 300 }),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_custom_encoder() {
        fn encode_fixed(_: &ValidatedArgs) -> Result<Payload> {
            Ok(Payload::Binary(vec![0xFE, 0x03, 0x32, 0xDE, 0xFC]))
        }
        let spec = CommandSpec::new("Start", Encoding::Custom(encode_fixed));
        let payload = encode_with(&spec, args! {}).unwrap();
        assert_eq!(payload.to_string(), "FE 03 32 DE FC");
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let spec = CommandSpec::text("SetGain", "SG ${group},${level:02X}\r")
            .param(ParamSpec::number("group").required())
            .param(ParamSpec::number("level").required())
            .transform("level", Transform::linear(60.0, 2.0));
        let args = args! { "group" => 4, "level" => 3.25 };
        assert_eq!(
            encode_with(&spec, args.clone()).unwrap(),
            encode_with(&spec, args).unwrap()
        );
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x90, 0x41, 0xFF], false), "9041ff");
        assert_eq!(to_hex(&[0x90, 0x41, 0xFF], true), "90 41 FF");
        assert_eq!(from_hex("9041FF").unwrap(), vec![0x90, 0x41, 0xFF]);
    }
}
