/*!
 * Bose ControlSpace ESP/EX and PowerMatch.
 *
 * ASCII commands end in CR. Numbers in the serial protocol are hex, while
 * module parameters addressed by name (`SA"name">index=value`) are decimal.
 * ACK (0x06) and NAK (0x15) bytes can arrive glued to the next reply, so their
 * rules are unanchored and a line may produce more than one event.
 */
use avlink_engine::{
    CommandSpec, Correlation, DriverMetadata, DriverProfile, Expectation, FieldKind, Fields,
    Framing, LineTerminator, ParamSpec, Pattern, ResponseRule, Result, TransportHint, Transform,
    UnitMatch, Value,
};

/// Catalog name
pub const NAME: &str = "bose-controlspace";

/// Lowest group level in dB; the wire value counts half-dB steps from here
const LEVEL_FLOOR_DB: f64 = -60.0;

fn group() -> ParamSpec {
    ParamSpec::number("group").required().range(1.0, 64.0)
}

fn toggle_state() -> ParamSpec {
    ParamSpec::string("state").required().one_of(["On", "Off", "Toggle"])
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let commands = vec![
        CommandSpec::text("ClearFaultAlarms", "CF\r").describe("Clear fault alarms"),
        CommandSpec::text("GetFaultStatus", "GF\r")
            .describe("Query the fault status")
            .expects(Expectation::fixed("fault", "FaultStatus")),
        CommandSpec::text("SetParameterRecall", "SS ${number:X}\r")
            .describe("Recall a parameter set")
            .param(ParamSpec::number("number").required().range(1.0, 255.0)),
        CommandSpec::text("GetParameterRecall", "GS\r")
            .describe("Query the active parameter set")
            .expects(Expectation::fixed("recall", "ParameterRecall")),
        CommandSpec::text("SetGroupLevel", "SG ${group:X},${value:X}\r")
            .describe("Set a group level in dB")
            .param(group())
            .param(ParamSpec::number("value").required().range(LEVEL_FLOOR_DB, 12.0))
            .transform("value", Transform::linear(-LEVEL_FLOOR_DB, 2.0)),
        CommandSpec::text("GetGroupLevel", "GG ${group:X}\r")
            .describe("Query a group level")
            .param(group())
            .expects(Expectation::keyed_by("group", "GroupLevel")),
        CommandSpec::text("SetGroupMute", "SN ${group:X},${state}\r")
            .describe("Mute, unmute or toggle a group")
            .param(group())
            .param(toggle_state())
            .transform("state", Transform::lookup([("On", "M"), ("Off", "U"), ("Toggle", "T")])),
        CommandSpec::text("GetGroupMute", "GN ${group:X}\r")
            .describe("Query a group mute")
            .param(group())
            .expects(Expectation::keyed_by("group", "GroupMute")),
        CommandSpec::text("SetGain", "SA\"${name}\">1=${value:.1f}\r")
            .describe("Set a gain module level by name")
            .param(ParamSpec::string("name").required())
            .param(ParamSpec::number("value").required().range(-60.5, 12.0)),
        CommandSpec::text("GetGain", "GA\"${name}\">1\r")
            .describe("Query a gain module level")
            .param(ParamSpec::string("name").required()),
        CommandSpec::text("SetGainMute", "SA\"${name}\">2=${state}\r")
            .describe("Mute, unmute or toggle a gain module")
            .param(ParamSpec::string("name").required())
            .param(toggle_state())
            .transform("state", Transform::lookup([("On", "O"), ("Off", "F"), ("Toggle", "T")])),
        CommandSpec::text("GetGainMute", "GA\"${name}\">2\r")
            .describe("Query a gain module mute")
            .param(ParamSpec::string("name").required()),
    ];

    let responses = vec![
        ResponseRule::new("Ack", Pattern::regex(r"\x06")?).describe("Command accepted"),
        ResponseRule::new("Nak", Pattern::regex(r"\x15(01|02|03|99)")?)
            .describe("Command rejected")
            .extract_with(nak),
        ResponseRule::new("FaultStatus", Pattern::regex(r"GF\s+([FC])$")?)
            .describe("Fault status")
            .extract_with(fault_status)
            .correlate(Correlation::keyed_by("query").infer_key()),
        ResponseRule::new("ParameterRecall", Pattern::regex(r"GS\s+([0-9A-Fa-f]+)$")?)
            .describe("Active parameter set, 0 when none")
            .capture("preset", 1usize, FieldKind::HexU8)
            .correlate(Correlation::keyed_by("query").infer_key()),
        ResponseRule::new(
            "GroupLevel",
            Pattern::regex(r"GG\s+([0-9A-Fa-f]+)\s*,\s*([0-9A-Fa-f]+)$")?,
        )
        .describe("Group level in dB")
        .extract_with(group_level)
        .correlate(Correlation::keyed_by("group")),
        ResponseRule::new("GroupMute", Pattern::regex(r"GN\s+([0-9A-Fa-f]+)\s*,\s*([MU])$")?)
            .describe("Group mute")
            .extract_with(group_mute)
            .correlate(Correlation::keyed_by("group")),
        ResponseRule::new("ModuleValue", Pattern::regex(r#"GA"([^"]+)"(?:>([^=]+))?=(.+)$"#)?)
            .describe("Value of a named module parameter")
            .extract_with(module_value),
    ];

    DriverProfile::new(
        DriverMetadata::new("Bose ControlSpace / PowerMatch", "Bose", "1.0.0")
            .describe("Bose ControlSpace ESP/EX and PowerMatch over the serial control protocol"),
        TransportHint::tcp(10055),
        Framing::lines(LineTerminator::Cr),
        commands,
        responses,
    )
}

fn nak(found: &UnitMatch<'_>) -> Option<Fields> {
    let code = found.group(1)?;
    let message = match code {
        "01" => "Invalid Module Name",
        "02" => "Illegal Index",
        "03" => "Value out-of-range",
        _ => "Unknown error",
    };
    Some(Fields::from([
        ("code".to_string(), Value::from(code)),
        ("message".to_string(), Value::from(message)),
    ]))
}

fn fault_status(found: &UnitMatch<'_>) -> Option<Fields> {
    Some(Fields::from([(
        "fault".to_string(),
        Value::Bool(found.group(1)? == "F"),
    )]))
}

fn group_level(found: &UnitMatch<'_>) -> Option<Fields> {
    let raw = found.hex(2)?;
    Some(Fields::from([
        ("group".to_string(), Value::Integer(found.hex(1)?)),
        ("value".to_string(), Value::Float(raw as f64 / 2.0 + LEVEL_FLOOR_DB)),
    ]))
}

fn group_mute(found: &UnitMatch<'_>) -> Option<Fields> {
    Some(Fields::from([
        ("group".to_string(), Value::Integer(found.hex(1)?)),
        ("muted".to_string(), Value::Bool(found.group(2)? == "M")),
    ]))
}

fn module_value(found: &UnitMatch<'_>) -> Option<Fields> {
    let raw = found.group(3)?.trim();
    let value = match raw {
        "O" => Value::Bool(true),
        "F" => Value::Bool(false),
        other => other
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::from(other)),
    };
    Some(Fields::from([
        ("name".to_string(), Value::from(found.group(1)?)),
        ("path".to_string(), Value::from(found.group(2).unwrap_or("").trim())),
        ("value".to_string(), value),
        ("raw".to_string(), Value::from(raw)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use avlink_engine::{args, Args, Driver, DriverSettings};
    use std::sync::Arc;

    fn driver() -> Driver {
        Driver::new(Arc::new(profile().unwrap()), DriverSettings::default())
    }

    fn text(d: &mut Driver, name: &str, args: Args) -> String {
        d.build_command(name, &args).unwrap().as_text().unwrap().to_string()
    }

    #[test]
    fn test_hex_commands() {
        let mut d = driver();
        assert_eq!(text(&mut d, "SetParameterRecall", args! { "number" => 26 }), "SS 1A\r");
        assert_eq!(text(&mut d, "SetGroupLevel", args! { "group" => 10, "value" => -60 }), "SG A,0\r");
        assert_eq!(text(&mut d, "SetGroupLevel", args! { "group" => 1, "value" => 12 }), "SG 1,90\r");
        assert_eq!(text(&mut d, "SetGroupLevel", args! { "group" => 1, "value" => -10.5 }), "SG 1,63\r");
        assert_eq!(text(&mut d, "SetGroupMute", args! { "group" => 2, "state" => "Toggle" }), "SN 2,T\r");
    }

    #[test]
    fn test_named_module_commands() {
        let mut d = driver();
        assert_eq!(
            text(&mut d, "SetGain", args! { "name" => "Mic 1", "value" => -6 }),
            "SA\"Mic 1\">1=-6.0\r"
        );
        assert_eq!(
            text(&mut d, "SetGainMute", args! { "name" => "Mic 1", "state" => "On" }),
            "SA\"Mic 1\">2=O\r"
        );
    }

    #[test]
    fn test_group_level_resolves_query() {
        let mut d = driver();
        d.build_command("GetGroupLevel", &args! { "group" => 12 }).unwrap();
        assert!(d.pending("12").is_some());

        let events = d.on_data(b"GG C,63\r");
        assert_eq!(events.len(), 1);
        assert!(events[0].is("GroupLevel"));
        assert_eq!(events[0].field("group"), Some(&Value::Integer(12)));
        assert_eq!(events[0].field("value"), Some(&Value::Float(-10.5)));
        assert_eq!(d.pending_count(), 0);
    }

    #[test]
    fn test_ack_glued_to_reply() {
        let mut d = driver();
        let events = d.on_data(b"\x06GN 3,M\r");
        assert_eq!(events.len(), 2);
        assert!(events[0].is("Ack"));
        assert!(events[1].is("GroupMute"));
        assert_eq!(events[1].field("muted"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_nak_and_fault() {
        let mut d = driver();
        let events = d.on_data(b"\x1503\rGF F\r");
        assert_eq!(events[0].field("message"), Some(&Value::from("Value out-of-range")));
        assert!(events[1].is("FaultStatus"));
        assert_eq!(events[1].field("fault"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_module_value() {
        let mut d = driver();
        let events = d.on_data(b"GA\"Mic 1\">1=-6.5\rGA\"Mic 1\">2=F\r");
        assert_eq!(events[0].field("name"), Some(&Value::from("Mic 1")));
        assert_eq!(events[0].field("path"), Some(&Value::from("1")));
        assert_eq!(events[0].field("value"), Some(&Value::Float(-6.5)));
        assert_eq!(events[1].field("value"), Some(&Value::Bool(false)));
    }
}
