/*!
 * Excell DSP.
 *
 * Level and mute frames are twelve bytes with an 8-bit sum at index 2 covering
 * every other byte. Replies carry `E0` at index 3.
 */
use avlink_engine::{
    BinaryLayout, ChecksumKind, ChecksumSpec, CommandSpec, DriverMetadata, DriverProfile,
    Encoding, Endian, Fields, Framing, ParamSpec, Pattern, RangePolicy, ResponseRule, Result,
    TransportHint, Transform, UnitMatch, ValidatedArgs, Value,
};

/// Catalog name
pub const NAME: &str = "excell-dsp";

const HEADER: u8 = 0xB3;
const FRAME_LEN: usize = 12;
const REPLY_MARKER: u8 = 0xE0;

const GROUP_INPUT: u8 = 0x2B;
const GROUP_OUTPUT: u8 = 0x27;

const SUB_VOLUME: u8 = 0x01;
const SUB_MUTE: u8 = 0x02;

fn channel_frame(group: u8, subcmd: u8) -> BinaryLayout {
    BinaryLayout::new()
        .constant(&[HEADER, 0x21, 0x00, 0x00, group, 0x01, subcmd, 0x00])
        .u8("channel")
        .constant(&[0x00])
}

fn volume(name: &str, group: u8, what: &str) -> CommandSpec {
    let layout = channel_frame(group, SUB_VOLUME)
        .i16("dB", Endian::Little)
        .with_checksum(ChecksumSpec::at(ChecksumKind::Sum8, 2));
    CommandSpec::new(name, Encoding::Binary(layout))
        .describe(format!("Set an {} level in dB", what))
        .param(ParamSpec::number("channel").required().range(1.0, 12.0))
        .param(ParamSpec::number("dB").required().range(-72.0, 12.0))
        .transform("channel", Transform::offset(-1))
        .transform("dB", Transform::linear(0.0, 100.0))
        .range_policy(RangePolicy::Clamp)
}

fn mute(name: &str, group: u8, what: &str) -> CommandSpec {
    let layout = channel_frame(group, SUB_MUTE)
        .custom(pack_mute)
        .with_checksum(ChecksumSpec::at(ChecksumKind::Sum8, 2));
    CommandSpec::new(name, Encoding::Binary(layout))
        .describe(format!("Mute or unmute an {}", what))
        .param(ParamSpec::number("channel").required().range(1.0, 12.0))
        .param(ParamSpec::boolean("muted").required())
        .transform("channel", Transform::offset(-1))
        .range_policy(RangePolicy::Clamp)
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let commands = vec![
        volume("SetInputVolume", GROUP_INPUT, "input"),
        mute("SetInputMute", GROUP_INPUT, "input"),
        volume("SetOutputVolume", GROUP_OUTPUT, "output"),
        mute("SetOutputMute", GROUP_OUTPUT, "output"),
        CommandSpec::new(
            "CallPreset",
            Encoding::Binary(BinaryLayout::new().custom(pack_preset)),
        )
        .describe("Recall a preset")
        .param(ParamSpec::number("preset").required().range(1.0, 30.0)),
        CommandSpec::new(
            "SetMatrix",
            Encoding::Binary(BinaryLayout::new().custom(pack_matrix)),
        )
        .describe("Connect or disconnect a matrix crosspoint")
        .param(ParamSpec::number("input").required().range(1.0, 30.0))
        .param(ParamSpec::number("output").required().range(1.0, 30.0))
        .param(ParamSpec::boolean("setPoint").required()),
    ];

    let responses = vec![
        ResponseRule::new("MuteStatus", Pattern::bytes("B3 ?? ?? E0 ?? ?? 02 ?? ?? ?? ?? ??")?)
            .describe("Mute state of a channel")
            .extract_with(mute_status),
        ResponseRule::new("VolumeStatus", Pattern::bytes("B3 ?? ?? E0 ?? ?? 01 ?? ?? ?? ?? ??")?)
            .describe("Level of a channel")
            .extract_with(volume_status),
    ];

    DriverProfile::new(
        DriverMetadata::new("Excell DSP", "Excell", "1.2.1")
            .describe("Excell DSP processor with level and mute feedback"),
        TransportHint::udp(50000),
        Framing::length_implicit(HEADER, FRAME_LEN),
        commands,
        responses,
    )
}

fn pack_mute(args: &ValidatedArgs) -> Result<Vec<u8>> {
    // 0x00 mutes, 0x01 unmutes
    let byte = if args.boolean("muted")? { 0x00 } else { 0x01 };
    Ok(vec![byte, 0x00])
}

fn pack_preset(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let index = (args.integer("preset")? - 1) as u8;
    Ok(vec![HEADER, 0x13, 0xC6u8.wrapping_add(index), 0x00, index, 0x00])
}

fn pack_matrix(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let input = args.integer("input")? as u8;
    let output = args.integer("output")? as u8;
    let set = u8::from(args.boolean("setPoint")?);
    Ok(vec![
        HEADER,
        0x21,
        0x7Bu8.wrapping_add(output),
        0x00,
        0xA6,
        0x00,
        0x01,
        0x00,
        input - 1,
        output - 1,
        set,
        0x00,
    ])
}

/// Channel type and 1-based channel of a reply
fn channel_of(bytes: &[u8]) -> Option<(&'static str, i64)> {
    if bytes.len() != FRAME_LEN || bytes[3] != REPLY_MARKER {
        return None;
    }
    let channel_type = match bytes[4] {
        GROUP_INPUT => "input",
        GROUP_OUTPUT => "output",
        _ => return None,
    };
    Some((channel_type, i64::from(bytes[8]) + 1))
}

fn mute_status(found: &UnitMatch<'_>) -> Option<Fields> {
    let bytes = found.bytes();
    let (channel_type, channel) = channel_of(bytes)?;
    Some(Fields::from([
        ("channelType".to_string(), Value::from(channel_type)),
        ("channel".to_string(), Value::Integer(channel)),
        ("muted".to_string(), Value::Bool(bytes[10] == 0x01)),
    ]))
}

fn volume_status(found: &UnitMatch<'_>) -> Option<Fields> {
    let bytes = found.bytes();
    let (channel_type, channel) = channel_of(bytes)?;
    let raw = i16::from_le_bytes([bytes[10], bytes[11]]);
    Some(Fields::from([
        ("channelType".to_string(), Value::from(channel_type)),
        ("channel".to_string(), Value::Integer(channel)),
        ("volumeDb".to_string(), Value::Float(f64::from(raw) / 100.0)),
        ("rawValue".to_string(), Value::Integer(i64::from(raw))),
    ]))
}
