/*!
 * Geston EG-7230 congress controller (Modbus ASCII).
 *
 * Frames are `:` + hex(address, function, data) + LRC + CRLF. Every command
 * goes to address 01.
 */
use avlink_engine::encode::from_hex;
use avlink_engine::{
    ChecksumKind, CommandSpec, Correlation, DriverMetadata, DriverProfile, Encoding, Expectation, Fields,
    Framing, LineTerminator, ParamSpec, Pattern, ResponseRule, Result, TransportHint, UnitMatch,
    Value,
};

/// Catalog name
pub const NAME: &str = "geston-eg7230";

/// Function code of the host status reply
const FN_STATUS: &str = "10";

/// Function code of the preset save reply
const FN_PRESET_SAVED: &str = "64";

fn modbus<N: Into<String>>(name: N, body: &str) -> CommandSpec {
    CommandSpec::new(name, Encoding::modbus_ascii(format!("01{}", body)))
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let mut commands = vec![
        modbus("SetCameraType", "20${cameraType:02X}")
            .describe("Camera protocol: 0/1 Pelco-D, 2 D70, 3 Yaan")
            .param(ParamSpec::number("cameraType").required().range(0.0, 3.0)),
        modbus("SetCameraNumber", "21${cameraNumber:02X}")
            .describe("Select a camera")
            .param(ParamSpec::number("cameraNumber").required().range(1.0, 4.0)),
    ];

    for (name, function, description) in [
        ("CameraMoveUp", "22", "Move the camera up"),
        ("CameraMoveDown", "23", "Move the camera down"),
        ("CameraMoveLeft", "24", "Move the camera left"),
        ("CameraMoveRight", "25", "Move the camera right"),
        ("CameraZoomIn", "26", "Zoom in"),
        ("CameraZoomOut", "27", "Zoom out"),
        ("CameraIrisOpen", "28", "Open the iris"),
        ("CameraIrisClose", "29", "Close the iris"),
        ("CameraSpeedIncrease", "2A", "Increase movement speed"),
        ("CameraSpeedDecrease", "2B", "Decrease movement speed"),
        ("CameraStop", "2E", "Stop the current camera action"),
        ("TurnOffAllUnits", "13", "Turn every microphone unit off"),
    ] {
        commands.push(modbus(name, function).describe(description));
    }

    commands.extend([
        modbus("CameraGotoPreset", "2F${presetNumber:02X}")
            .describe("Go to a camera preset")
            .param(ParamSpec::number("presetNumber").required().range(0.0, 255.0)),
        modbus("TurnOnUnit", "11${unitNumber:02X}")
            .describe("Turn a microphone unit on")
            .param(ParamSpec::number("unitNumber").required().range(1.0, 255.0)),
        modbus("TurnOffUnit", "12${unitNumber:02X}")
            .describe("Turn a microphone unit off")
            .param(ParamSpec::number("unitNumber").required().range(1.0, 255.0)),
        modbus("GetStatus", "0F")
            .describe("Query working mode, speaking time and speaker count")
            .expects(Expectation::fixed("host", "HostStatus")),
    ]);

    let responses = vec![
        ResponseRule::new(
            "HostStatus",
            Pattern::regex(r"(?i)^:([0-9A-F]{2})10([0-9A-F]{2})([0-9A-F]{2})([0-9A-F]{2})[0-9A-F]{2}$")?,
        )
        .describe("Host status")
        .extract_with(host_status)
        .correlate(Correlation::keyed_by("host").infer_key()),
        ResponseRule::new("PresetSaveStatus", Pattern::regex(r"(?i)^:([0-9A-F]{2})64(00|01)[0-9A-F]{2}$")?)
            .describe("Camera preset save result")
            .extract_with(preset_saved),
        ResponseRule::new("Ack", Pattern::regex(r"(?i)^:([0-9A-F]{2})([0-9A-F]{2})[0-9A-F]*$")?)
            .describe("Command accepted, no data")
            .extract_with(ack),
    ];

    DriverProfile::new(
        DriverMetadata::new("EG-7230 Controller", "Geston", "1.0.0")
            .describe("Camera and microphone control through the EG-7230 over Modbus ASCII"),
        TransportHint::serial(),
        Framing::lines(LineTerminator::CrLf),
        commands,
        responses,
    )
}

/// Whether the frame's LRC checks out
fn lrc_ok(found: &UnitMatch<'_>) -> bool {
    let Some(text) = found.unit().text() else {
        return false;
    };
    match from_hex(text.trim_start_matches(':')) {
        Ok(bytes) => !bytes.is_empty() && ChecksumKind::Sum8.compute(bytes) == 0,
        Err(_) => false,
    }
}

fn host_status(found: &UnitMatch<'_>) -> Option<Fields> {
    if !lrc_ok(found) {
        return None;
    }
    Some(Fields::from([
        ("deviceAddress".to_string(), Value::Integer(found.hex(1)?)),
        ("workingMode".to_string(), Value::Integer(found.hex(2)?)),
        ("speakingTime".to_string(), Value::Integer(found.hex(3)?)),
        ("numberOfSpeakers".to_string(), Value::Integer(found.hex(4)?)),
    ]))
}

fn preset_saved(found: &UnitMatch<'_>) -> Option<Fields> {
    if !lrc_ok(found) {
        return None;
    }
    Some(Fields::from([
        ("deviceAddress".to_string(), Value::Integer(found.hex(1)?)),
        ("success".to_string(), Value::Bool(found.group(2)? == "00")),
    ]))
}

fn ack(found: &UnitMatch<'_>) -> Option<Fields> {
    let function = found.group(2)?;
    if function == FN_STATUS || function == FN_PRESET_SAVED || !lrc_ok(found) {
        return None;
    }
    Some(Fields::from([
        ("deviceAddress".to_string(), Value::Integer(found.hex(1)?)),
        ("function".to_string(), Value::Integer(found.hex(2)?)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use avlink_engine::encode::modbus_ascii_frame;
    use avlink_engine::{args, Args, Driver, DriverSettings};
    use std::sync::Arc;

    fn driver() -> Driver {
        Driver::new(Arc::new(profile().unwrap()), DriverSettings::default())
    }

    #[test]
    fn test_frames() {
        let mut d = driver();
        let text = |d: &mut Driver, name: &str, args: Args| -> String {
            d.build_command(name, &args).unwrap().as_text().unwrap().to_string()
        };
        assert_eq!(text(&mut d, "CameraMoveUp", args! {}), ":0122DD\r\n");
        assert_eq!(text(&mut d, "GetStatus", args! {}), ":010FF0\r\n");
        assert_eq!(text(&mut d, "TurnOnUnit", args! { "unitNumber" => 10 }), ":01110AE4\r\n");
        assert_eq!(text(&mut d, "CameraGotoPreset", args! { "presetNumber" => 255 }), ":012FFFD1\r\n");
    }

    #[test]
    fn test_host_status() {
        let mut d = driver();
        d.build_command("GetStatus", &args! {}).unwrap();

        let line = modbus_ascii_frame("011002781E").unwrap();
        let events = d.on_data(line.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(events[0].is("HostStatus"));
        assert_eq!(events[0].field("workingMode"), Some(&Value::Integer(2)));
        assert_eq!(events[0].field("speakingTime"), Some(&Value::Integer(0x78)));
        assert_eq!(events[0].field("numberOfSpeakers"), Some(&Value::Integer(0x1E)));
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn test_ack_and_preset_save() {
        let mut d = driver();
        let events = d.on_data(b":0122DD\r\n:0164019A\r\n");
        assert!(events[0].is("Ack"));
        assert_eq!(events[0].field("function"), Some(&Value::Integer(0x22)));
        assert!(events[1].is("PresetSaveStatus"));
        assert_eq!(events[1].field("success"), Some(&Value::Bool(false)));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_bad_lrc_is_unrecognized() {
        let mut d = driver();
        let events = d.on_data(b":0122DE\r\n");
        assert_eq!(events[0].event_type(), "Unrecognized");
    }
}
