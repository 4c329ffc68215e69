/*!
 * VISCA PTZ camera over UDP.
 *
 * Commands go to camera 1 (`81 .. FF`). Replies start with `y0` where `y` is
 * the camera address plus 8, and are matched on their hex form. Positions
 * travel as four-nibble words.
 */
use avlink_engine::{
    BinaryLayout, ByteMatch, CommandSpec, Correlation, DriverMetadata, DriverProfile, Encoding,
    Error, Expectation, FieldKind, Fields, FollowUp, Framing, ParamSpec, Pattern, RangePolicy,
    ResponseRule, Result, TransportHint, Transform, UnitMatch, ValidatedArgs, Value,
};

/// Catalog name
pub const NAME: &str = "visca-ptz";

const HEADER: u8 = 0x81;
const TERMINATOR: u8 = 0xFF;
const MAX_FRAME: usize = 16;

const PAN_MAX_DEG: f64 = 170.0;
const PAN_MAX_COUNTS: f64 = 0x1E1B as f64;
const TILT_MAX_DEG: f64 = 90.0;
const TILT_MAX_COUNTS: f64 = 0x0FF0 as f64;

/// Optical zoom end
const ZOOM_OPTICAL_MAX: f64 = 0x4000 as f64;
/// Digital zoom end
const ZOOM_DIGITAL_MAX: f64 = 0x7AC0 as f64;

const DIRECTIONS: [&str; 9] = [
    "stop",
    "up",
    "down",
    "left",
    "right",
    "upLeft",
    "upRight",
    "downLeft",
    "downRight",
];

fn pan_counts_per_deg() -> f64 {
    PAN_MAX_COUNTS / PAN_MAX_DEG
}

fn tilt_counts_per_deg() -> f64 {
    TILT_MAX_COUNTS / TILT_MAX_DEG
}

fn visca(body: &[u8]) -> Encoding {
    Encoding::Binary(
        BinaryLayout::new()
            .constant(&[HEADER])
            .constant(body)
            .constant(&[TERMINATOR]),
    )
}

fn packed(pack: avlink_engine::encode::PackFn) -> Encoding {
    Encoding::Binary(
        BinaryLayout::new()
            .constant(&[HEADER])
            .custom(pack)
            .constant(&[TERMINATOR]),
    )
}

fn speeds(spec: CommandSpec) -> CommandSpec {
    spec.param(ParamSpec::number("panSpeed").range(1.0, 24.0).with_default(10))
        .param(ParamSpec::number("tiltSpeed").range(1.0, 20.0).with_default(10))
}

fn preset(name: &str, action: u8, description: &str) -> CommandSpec {
    CommandSpec::new(
        name,
        Encoding::Binary(
            BinaryLayout::new()
                .constant(&[HEADER, 0x01, 0x04, 0x3F, action])
                .u8("presetNumber")
                .constant(&[TERMINATOR]),
        ),
    )
    .describe(description)
    .param(ParamSpec::number("presetNumber").required().range(0.0, 255.0))
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let move_absolute = BinaryLayout::new()
        .constant(&[HEADER, 0x01, 0x06, 0x02])
        .u8("panSpeed")
        .u8("tiltSpeed")
        .nibbles16("panDegrees")
        .nibbles16("tiltDegrees")
        .constant(&[TERMINATOR]);

    let commands = vec![
        speeds(CommandSpec::new("MoveContinuous", packed(pack_move)))
            .describe("Start or stop a continuous pan/tilt move")
            .param(ParamSpec::string("moveDirection").required().one_of(DIRECTIONS)),
        speeds(CommandSpec::new("MoveAbsolute", Encoding::Binary(move_absolute)))
            .describe("Move to a pan/tilt position in degrees")
            .param(ParamSpec::number("panDegrees").required().range(-PAN_MAX_DEG, PAN_MAX_DEG))
            .param(ParamSpec::number("tiltDegrees").required().range(-20.0, TILT_MAX_DEG))
            .param(
                ParamSpec::boolean("verify")
                    .with_default(false)
                    .with_description("Query the position once the move settles"),
            )
            .param(ParamSpec::number("settleMs").range(0.0, 60000.0).with_default(800))
            .transform("panDegrees", Transform::linear(0.0, pan_counts_per_deg()))
            .transform("tiltDegrees", Transform::linear(0.0, tilt_counts_per_deg()))
            .range_policy(RangePolicy::Clamp)
            .follow_up(
                FollowUp::new("InquirePosition", 800)
                    .when("verify")
                    .delay_from("settleMs", 100),
            ),
        CommandSpec::new("Zoom", packed(pack_zoom))
            .describe("Zoom in, out, stop or go to a ratio")
            .param(
                ParamSpec::string("zoomMode")
                    .required()
                    .one_of(["stop", "in", "out", "setPosition"]),
            )
            .param(ParamSpec::number("zoomSpeed").range(0.0, 7.0).with_default(3))
            .param(ParamSpec::number("zoomRatio").range(1.0, 20.0))
            .range_policy(RangePolicy::Clamp),
        preset("PresetSet", 0x01, "Store the current position in a preset"),
        preset("PresetRecall", 0x02, "Recall a preset"),
        preset("PresetReset", 0x00, "Clear a preset"),
        CommandSpec::new("InquirePosition", visca(&[0x09, 0x06, 0x12]))
            .describe("Query the pan/tilt position")
            .expects(Expectation::fixed("position", "Position")),
        CommandSpec::new("InquireZoom", visca(&[0x09, 0x04, 0x47]))
            .describe("Query the zoom position")
            .expects(Expectation::fixed("zoom", "Zoom")),
    ];

    let responses = vec![
        ResponseRule::new("Position", Pattern::hex_regex(r"^[9a-f]050([0-9a-f]{16})ff$")?)
            .describe("Pan/tilt position")
            .extract_with(position)
            .correlate(Correlation::keyed_by("query").infer_key()),
        ResponseRule::new("Zoom", Pattern::hex_regex(r"^[9a-f]050([0-9a-f]{8})ff$")?)
            .describe("Zoom position")
            .extract_with(zoom)
            .correlate(Correlation::keyed_by("query").infer_key()),
        ResponseRule::new("Ack", Pattern::hex_regex(r"^[9a-f]04([0-9a-f])ff$")?)
            .describe("Command accepted")
            .capture("socket", 1usize, FieldKind::HexU8),
        ResponseRule::new("Completion", Pattern::hex_regex(r"^[9a-f]05([0-9a-f])ff$")?)
            .describe("Command completed")
            .capture("socket", 1usize, FieldKind::HexU8),
        ResponseRule::new("Error", Pattern::hex_regex(r"^[9a-f]06[0-9a-f]0([2-5])ff$")?)
            .describe("Command failed")
            .extract_with(error),
    ];

    DriverProfile::new(
        DriverMetadata::new("PTZ Camera", "VISCA Compatible", "1.0.2")
            .describe("Pan/tilt/zoom control for VISCA over IP cameras"),
        TransportHint::udp(1259),
        Framing::Terminated {
            start: ByteMatch::masked(0x80, 0x8F),
            end: TERMINATOR,
            max_length: MAX_FRAME,
        },
        commands,
        responses,
    )
}

fn pack_move(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let direction = args.string("moveDirection")?;
    let (x, y) = match direction {
        "stop" => return Ok(vec![0x01, 0x06, 0x01, 0x00, 0x00, 0x03, 0x03]),
        "up" => (0x03, 0x01),
        "down" => (0x03, 0x02),
        "left" => (0x01, 0x03),
        "right" => (0x02, 0x03),
        "upLeft" => (0x01, 0x01),
        "upRight" => (0x02, 0x01),
        "downLeft" => (0x01, 0x02),
        "downRight" => (0x02, 0x02),
        other => return Err(Error::encoding(format!("invalid move direction '{}'", other))),
    };
    Ok(vec![
        0x01,
        0x06,
        0x01,
        args.integer("panSpeed")? as u8,
        args.integer("tiltSpeed")? as u8,
        x,
        y,
    ])
}

fn nibbles(word: u16) -> [u8; 4] {
    [
        ((word >> 12) & 0x0F) as u8,
        ((word >> 8) & 0x0F) as u8,
        ((word >> 4) & 0x0F) as u8,
        (word & 0x0F) as u8,
    ]
}

fn pack_zoom(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let speed = args.integer("zoomSpeed")? as u8;
    match args.string("zoomMode")? {
        "stop" => Ok(vec![0x01, 0x04, 0x07, 0x00]),
        "in" => Ok(vec![0x01, 0x04, 0x07, 0x20 + speed]),
        "out" => Ok(vec![0x01, 0x04, 0x07, 0x30 + speed]),
        "setPosition" => {
            if !args.contains("zoomRatio") {
                return Err(Error::encoding("zoomRatio is required for setPosition"));
            }
            let ratio = args.number("zoomRatio")?;
            let pos = (((ratio - 1.0) / 19.0) * ZOOM_OPTICAL_MAX).round();
            let pos = pos.clamp(0.0, ZOOM_DIGITAL_MAX) as u16;
            let mut body = vec![0x01, 0x04, 0x47];
            body.extend(nibbles(pos));
            Ok(body)
        }
        other => Err(Error::encoding(format!("invalid zoom mode '{}'", other))),
    }
}

/// Fold the low nibbles of hex-encoded bytes into one word per four bytes
fn words(hex: &str) -> Option<Vec<u16>> {
    let bytes = avlink_engine::encode::from_hex(hex).ok()?;
    Some(
        bytes
            .chunks(4)
            .map(|chunk| chunk.iter().fold(0u16, |acc, b| (acc << 4) | u16::from(b & 0x0F)))
            .collect(),
    )
}

fn position(found: &UnitMatch<'_>) -> Option<Fields> {
    let words = words(found.group(1)?)?;
    let (pan, tilt) = (*words.first()? as i16, *words.get(1)? as i16);
    let pan_deg = f64::from(pan) / pan_counts_per_deg();
    let tilt_deg = f64::from(tilt) / tilt_counts_per_deg();
    Some(Fields::from([
        ("panDegrees".to_string(), Value::Float((pan_deg * 100.0).round() / 100.0)),
        ("tiltDegrees".to_string(), Value::Float((tilt_deg * 100.0).round() / 100.0)),
        ("panHex".to_string(), Value::from(format!("{:04X}", pan as u16))),
        ("tiltHex".to_string(), Value::from(format!("{:04X}", tilt as u16))),
    ]))
}

fn zoom(found: &UnitMatch<'_>) -> Option<Fields> {
    let z = f64::from(*words(found.group(1)?)?.first()?);
    let ratio = if z <= ZOOM_OPTICAL_MAX {
        1.0 + z / ZOOM_OPTICAL_MAX * 19.0
    } else {
        20.0 + (z - ZOOM_OPTICAL_MAX) / (ZOOM_DIGITAL_MAX - ZOOM_OPTICAL_MAX) * 12.0
    };
    Some(Fields::from([
        ("zoomRatio".to_string(), Value::Float((ratio * 100.0).round() / 100.0)),
        ("zoomHex".to_string(), Value::from(format!("{:04X}", z as u16))),
    ]))
}

fn error(found: &UnitMatch<'_>) -> Option<Fields> {
    let code = found.int(1)?;
    let message = match code {
        2 => "syntax_error",
        3 => "command_buffer_full",
        4 => "command_cancelled",
        _ => "no_socket",
    };
    Some(Fields::from([
        ("code".to_string(), Value::Integer(code)),
        ("message".to_string(), Value::from(message)),
    ]))
}
