/*!
 * Aten US3344I RS-422/485 port selector.
 */
use avlink_engine::{
    CommandSpec, Correlation, DriverMetadata, DriverProfile, Expectation, FieldKind, Fields,
    Framing, LineTerminator, ParamSpec, Pattern, ResponseRule, Result, TransportHint, UnitMatch,
    Value,
};

/// Catalog name
pub const NAME: &str = "aten-us3344";

/// Correlation key of device-wide queries
const DEVICE: &str = "selector";

fn port() -> ParamSpec {
    ParamSpec::number("port")
        .required()
        .range(1.0, 4.0)
        .with_description("Port number (1-4)")
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let commands = vec![
        CommandSpec::text("NextPort", "sw\r\n").describe("Switch to the next port"),
        CommandSpec::text("SetPort", "sw p${port:02d}\r\n")
            .describe("Activate a port")
            .param(port()),
        CommandSpec::text("GetPortStatus", "usb p${port:02d}\r\n")
            .describe("Query the status of a port")
            .param(port())
            .expects(Expectation::keyed_by("port", "PortStatus")),
        CommandSpec::text("GetInfo", "info\r\n")
            .describe("Query the active port")
            .expects(Expectation::fixed(DEVICE, "CurrentPort")),
    ];

    let responses = vec![
        ResponseRule::new("Ok", Pattern::regex(r"(?i)^Command OK$")?).describe("Command accepted"),
        ResponseRule::new("Error", Pattern::regex(r"(?i)^Command Incorrect$")?)
            .describe("Command rejected"),
        ResponseRule::new("PortStatus", Pattern::regex(r"(?i)^p0([1-4])\s+(ACTIVE|INACTIVE)$")?)
            .describe("Status of one port")
            .extract_with(port_status)
            .correlate(Correlation::keyed_by("port")),
        ResponseRule::new("CurrentPort", Pattern::regex(r"(?i)^CURRENT\s+p0([1-4])$")?)
            .describe("Active port")
            .capture("port", 1usize, FieldKind::Int)
            .correlate(Correlation::keyed_by("device").infer_key()),
    ];

    DriverProfile::new(
        DriverMetadata::new("PortSelector-4", "Aten", "1.0.0")
            .describe("Aten US3344I four port RS-422/485 selector"),
        TransportHint::serial(),
        Framing::lines(LineTerminator::CrLf),
        commands,
        responses,
    )
}

fn port_status(found: &UnitMatch<'_>) -> Option<Fields> {
    let port = found.int(1)?;
    let active = found.group(2)?.eq_ignore_ascii_case("ACTIVE");
    Some(Fields::from([
        ("port".to_string(), Value::Integer(port)),
        ("active".to_string(), Value::Bool(active)),
    ]))
}
