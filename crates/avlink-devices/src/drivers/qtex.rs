/*!
 * QTEX conference system.
 *
 * Every message is five bytes: `FE <cmd> <p1> <p2> FC`. Microphone commands
 * pack the upper bits of the unit id into the high nibble of `p1` and the
 * action into its low nibble.
 */
use avlink_engine::{
    BinaryLayout, CommandSpec, DriverMetadata, DriverProfile, Encoding, Error, Fields, Framing,
    ParamSpec, Pattern, ResponseRule, Result, TransportHint, UnitMatch, ValidatedArgs, Value,
};

/// Catalog name
pub const NAME: &str = "qtex-conference";

const START: u8 = 0xFE;
const END: u8 = 0xFC;

const CMD_MIC: u8 = 0x11;
const CMD_MEETING_MODE: u8 = 0xC1;
const CMD_VOLUME: u8 = 0xC2;
const CMD_CAMERA: u8 = 0xC7;
const CMD_STATUS: u8 = 0xCA;

const DELEGATE: &str = "delegate";
const CHAIRMAN: &str = "chairman";

/// Meeting modes in wire order
const MEETING_MODES: [&str; 5] = ["FIFO", "LIMIT", "FREE", "APPLY", "VOICE_CONTROL"];

fn frame(body: &[u8]) -> Encoding {
    Encoding::Binary(
        BinaryLayout::new()
            .constant(&[START])
            .constant(body)
            .constant(&[END]),
    )
}

fn frame_with(cmd: u8, pack: avlink_engine::encode::PackFn) -> Encoding {
    Encoding::Binary(
        BinaryLayout::new()
            .constant(&[START, cmd])
            .custom(pack)
            .constant(&[END]),
    )
}

fn unit_params(spec: CommandSpec) -> CommandSpec {
    spec.param(
        ParamSpec::number("unitId")
            .required()
            .range(1.0, 999.0)
            .with_description("Microphone unit id"),
    )
    .param(
        ParamSpec::string("unitType")
            .one_of([DELEGATE, CHAIRMAN])
            .with_default(DELEGATE),
    )
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let commands = vec![
        unit_params(CommandSpec::new("MicOn", frame_with(CMD_MIC, pack_mic_on)))
            .describe("Turn a microphone on"),
        unit_params(CommandSpec::new("MicOff", frame_with(CMD_MIC, pack_mic_off)))
            .describe("Turn a microphone off"),
        CommandSpec::new("ChairmanPriority", frame_with(CMD_MIC, pack_priority))
            .describe("Chairman priority: mute every delegate")
            .param(ParamSpec::number("unitId").required().range(1.0, 999.0)),
        CommandSpec::new("StartRegistration", frame(&[0x03, 0x32, 0xDE]))
            .describe("Start unit registration"),
        CommandSpec::new("EndRegistration", frame(&[0x03, 0x01, 0x00]))
            .describe("End unit registration"),
        CommandSpec::new("SetMeetingMode", frame_with(CMD_MEETING_MODE, pack_meeting_mode))
            .describe("Set the discussion mode")
            .param(ParamSpec::string("mode").required().one_of(MEETING_MODES))
            .param(
                ParamSpec::number("speakersCount")
                    .range(1.0, 8.0)
                    .with_default(1)
                    .with_description("Simultaneous speakers"),
            ),
        CommandSpec::new("SetVolume", frame_with(CMD_VOLUME, pack_volume))
            .describe("Set the input or output level")
            .param(ParamSpec::string("channel").required().one_of(["input", "output"]))
            .param(ParamSpec::number("level").required().range(0.0, 20.0)),
        CommandSpec::new("RecallCameraPosition", frame_with(CMD_CAMERA, pack_camera_preset))
            .describe("Point the tracking camera at a preset")
            .param(ParamSpec::number("preset").required().range(0.0, 225.0)),
        CommandSpec::new("RecallPanorama", frame(&[CMD_CAMERA, 0x00, 0x00]))
            .describe("Return the tracking camera to the panorama view"),
        CommandSpec::new("RequestStatus", frame(&[CMD_STATUS, 0x00, 0x00]))
            .describe("Query meeting mode and speaker count"),
    ];

    let responses = vec![
        ResponseRule::new("MicControl", Pattern::bytes("FE 11 ?? ?? FC")?)
            .describe("Microphone state change")
            .extract_with(mic_control),
        ResponseRule::new("RegistrationStarted", Pattern::bytes("FE 03 32 DE FC")?)
            .describe("Registration started"),
        ResponseRule::new("RegistrationEnded", Pattern::bytes("FE 03 01 00 FC")?)
            .describe("Registration ended"),
        ResponseRule::new("CameraTracking", Pattern::bytes("FE C7 ?? ?? FC")?)
            .describe("Tracking camera moved")
            .extract_with(camera_tracking),
        ResponseRule::new("Status", Pattern::bytes("FE CA ?? ?? FC")?)
            .describe("Meeting mode and speaker count")
            .extract_with(status),
    ];

    DriverProfile::new(
        DriverMetadata::new("QTEX Conference System", "QTEX", "1.0.0")
            .describe("QTEX discussion system microphone and camera control"),
        TransportHint::serial(),
        Framing::fixed(START, 5, END),
        commands,
        responses,
    )
}

/// Microphone actions, by unit type
fn mic_action(unit_type: &str, on: bool) -> u8 {
    match (unit_type, on) {
        (CHAIRMAN, true) => 0x07,
        (CHAIRMAN, false) => 0x08,
        (_, true) => 0x00,
        (_, false) => 0x01,
    }
}

const ACTION_PRIORITY: u8 = 0x0B;

fn pack_unit(args: &ValidatedArgs, action: u8) -> Result<Vec<u8>> {
    let id = args.integer("unitId")?;
    Ok(vec![(((id >> 8) as u8) << 4) | action, (id & 0xFF) as u8])
}

fn pack_mic_on(args: &ValidatedArgs) -> Result<Vec<u8>> {
    pack_unit(args, mic_action(args.string("unitType")?, true))
}

fn pack_mic_off(args: &ValidatedArgs) -> Result<Vec<u8>> {
    pack_unit(args, mic_action(args.string("unitType")?, false))
}

fn pack_priority(args: &ValidatedArgs) -> Result<Vec<u8>> {
    pack_unit(args, ACTION_PRIORITY)
}

fn pack_meeting_mode(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let mode = args.string("mode")?;
    let index = MEETING_MODES
        .iter()
        .position(|m| *m == mode)
        .ok_or_else(|| Error::encoding(format!("unknown meeting mode '{}'", mode)))?;
    Ok(vec![index as u8, args.integer("speakersCount")? as u8])
}

fn pack_volume(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let channel = match args.string("channel")? {
        "input" => 0x01,
        _ => 0x02,
    };
    Ok(vec![channel, args.integer("level")? as u8])
}

fn pack_camera_preset(args: &ValidatedArgs) -> Result<Vec<u8>> {
    let preset = args.integer("preset")?;
    Ok(vec![(preset >> 8) as u8, (preset & 0xFF) as u8])
}

fn mic_control(found: &UnitMatch<'_>) -> Option<Fields> {
    let p1 = found.hex(1)?;
    let p2 = found.hex(2)?;
    let unit_id = ((p1 >> 4) << 8) | p2;
    let (unit_type, action) = match p1 & 0x0F {
        0x00 => (DELEGATE, "on"),
        0x01 => (DELEGATE, "off"),
        0x07 => (CHAIRMAN, "on"),
        0x08 => (CHAIRMAN, "off"),
        0x0B => (CHAIRMAN, "priority"),
        _ => return None,
    };
    Some(Fields::from([
        ("unitId".to_string(), Value::Integer(unit_id)),
        ("unitType".to_string(), Value::from(unit_type)),
        ("action".to_string(), Value::from(action)),
    ]))
}

fn camera_tracking(found: &UnitMatch<'_>) -> Option<Fields> {
    let preset = (found.hex(1)? << 8) | found.hex(2)?;
    Some(Fields::from([
        ("preset".to_string(), Value::Integer(preset)),
        ("panorama".to_string(), Value::Bool(preset == 0)),
    ]))
}

fn status(found: &UnitMatch<'_>) -> Option<Fields> {
    let mode = MEETING_MODES.get(usize::try_from(found.hex(1)?).ok()?)?;
    Some(Fields::from([
        ("mode".to_string(), Value::from(*mode)),
        ("speakersCount".to_string(), Value::Integer(found.hex(2)?)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use avlink_engine::{args, Args, Driver, DriverSettings, Event, ValidationError};
    use std::sync::Arc;

    fn driver() -> Driver {
        Driver::new(Arc::new(profile().unwrap()), DriverSettings::default())
    }

    fn bytes(d: &mut Driver, name: &str, args: Args) -> Vec<u8> {
        d.build_command(name, &args).unwrap().into_bytes()
    }

    #[test]
    fn test_microphone_frames() {
        let mut d = driver();
        assert_eq!(bytes(&mut d, "MicOn", args! { "unitId" => 5 }), [0xFE, 0x11, 0x00, 0x05, 0xFC]);
        assert_eq!(
            bytes(&mut d, "MicOff", args! { "unitId" => 300 }),
            [0xFE, 0x11, 0x11, 0x2C, 0xFC]
        );
        assert_eq!(
            bytes(&mut d, "MicOn", args! { "unitId" => 1, "unitType" => "chairman" }),
            [0xFE, 0x11, 0x07, 0x01, 0xFC]
        );
        assert_eq!(
            bytes(&mut d, "ChairmanPriority", args! { "unitId" => 1 }),
            [0xFE, 0x11, 0x0B, 0x01, 0xFC]
        );

        let err = d.build_command("MicOn", &args! { "unitId" => 1000 }).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::OutOfRange { .. })));
        let err = d
            .build_command("MicOn", &args! { "unitId" => 1, "unitType" => "guest" })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidEnumValue { .. })));
    }

    #[test]
    fn test_system_frames() {
        let mut d = driver();
        assert_eq!(bytes(&mut d, "StartRegistration", args! {}), [0xFE, 0x03, 0x32, 0xDE, 0xFC]);
        assert_eq!(
            bytes(&mut d, "SetMeetingMode", args! { "mode" => "APPLY", "speakersCount" => 4 }),
            [0xFE, 0xC1, 0x03, 0x04, 0xFC]
        );
        assert_eq!(
            bytes(&mut d, "SetMeetingMode", args! { "mode" => "FIFO" }),
            [0xFE, 0xC1, 0x00, 0x01, 0xFC]
        );
        assert_eq!(
            bytes(&mut d, "SetVolume", args! { "channel" => "output", "level" => 12 }),
            [0xFE, 0xC2, 0x02, 0x0C, 0xFC]
        );
        assert_eq!(
            bytes(&mut d, "RecallCameraPosition", args! { "preset" => 200 }),
            [0xFE, 0xC7, 0x00, 0xC8, 0xFC]
        );
        assert_eq!(bytes(&mut d, "RequestStatus", args! {}), [0xFE, 0xCA, 0x00, 0x00, 0xFC]);
    }

    #[test]
    fn test_mic_reply_decodes_unit() {
        let mut d = driver();
        let events = d.on_data(&[0xFE, 0x11, 0x11, 0x2C, 0xFC, 0xFE, 0x11, 0x07, 0x02, 0xFC]);
        assert_eq!(events.len(), 2);
        assert!(events[0].is("MicControl"));
        assert_eq!(events[0].field("unitId"), Some(&Value::Integer(300)));
        assert_eq!(events[0].field("action"), Some(&Value::from("off")));
        assert_eq!(events[1].field("unitType"), Some(&Value::from("chairman")));
    }

    #[test]
    fn test_status_and_registration() {
        let mut d = driver();
        let events = d.on_data(&[
            0xFE, 0xCA, 0x02, 0x03, 0xFC, 0xFE, 0x03, 0x32, 0xDE, 0xFC, 0xFE, 0xC7, 0x00, 0x00,
            0xFC,
        ]);
        assert_eq!(events[0].field("mode"), Some(&Value::from("FREE")));
        assert_eq!(events[0].field("speakersCount"), Some(&Value::Integer(3)));
        assert!(events[1].is("RegistrationStarted"));
        assert_eq!(events[2].field("panorama"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_resync_after_noise() {
        let mut d = driver();
        let events = d.on_data(&[0x00, 0x42, 0xFE, 0x03, 0x01, 0x00, 0xFC]);
        assert!(matches!(events[0], Event::FrameResyncDiscard { discarded: 2 }));
        assert!(events[1].is("RegistrationEnded"));
    }
}
