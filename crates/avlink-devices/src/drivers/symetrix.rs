/*!
 * Symetrix Radius NX DSP.
 *
 * Mute and volume are both set with `CS <controller> <value>`, and the device
 * reports controller values the same way for both. A value of 0 or 65535 is
 * ambiguous on its own: it is a mute state if a mute was just sent to that
 * controller and a volume extreme otherwise. `GS` queries are answered with a
 * bare number that does not even name the controller.
 */
use avlink_engine::{
    CommandSpec, Correlation, DriverMetadata, DriverProfile, Expectation, FieldKind, Fields,
    Framing, LineTerminator, ParamSpec, Pattern, ResponseRule, Result, TransportHint, Transform,
    Value,
};

/// Catalog name
pub const NAME: &str = "symetrix-radius";

/// Raw controller value meaning "muted"
pub const MUTE_ON: i64 = 65535;

/// Raw controller value meaning "unmuted"
pub const MUTE_OFF: i64 = 0;

const RAW_FULL_SCALE: f64 = 65535.0;

fn controller() -> ParamSpec {
    ParamSpec::number("controller")
        .required()
        .range(1.0, 10000.0)
        .with_description("Controller number")
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let commands = vec![
        CommandSpec::text("Mute", "CS ${controller} ${state}\r")
            .describe("Mute or unmute a channel")
            .param(controller())
            .param(ParamSpec::boolean("state").required())
            .transform(
                "state",
                Transform::lookup([("true", MUTE_ON.to_string()), ("false", MUTE_OFF.to_string())]),
            )
            .expects(Expectation::keyed_by("controller", "Mute")),
        CommandSpec::text("Volume", "CS ${controller} ${value}\r")
            .describe("Set a channel level in percent")
            .param(controller())
            .param(ParamSpec::number("value").required().range(0.0, 100.0))
            .transform("value", Transform::linear(0.0, RAW_FULL_SCALE / 100.0))
            .expects(Expectation::keyed_by("controller", "Volume")),
        CommandSpec::text("PresetRecall", "LP ${preset}\r")
            .describe("Recall a preset")
            .param(ParamSpec::number("preset").required().range(1.0, 1000.0)),
        CommandSpec::text("GetState", "GS ${controller}\r")
            .describe("Query a controller value")
            .param(controller())
            .expects(Expectation::keyed_by("controller", "GetState")),
    ];

    let responses = vec![
        ResponseRule::new(
            "controller_value",
            Pattern::regex(r"^#(?P<controller>\d{5})=(?P<raw>\d{1,5})$")?,
        )
        .describe("Pushed controller value")
        .emits("Volume")
        .capture("controller", "controller", FieldKind::Int)
        .capture("raw", "raw", FieldKind::Int)
        .correlate(by_controller()),
        ResponseRule::new(
            "set_echo",
            Pattern::regex(r"(?i)^CS\s+(\d+)\s+(\d+)(?:\s+succeeded)?$")?,
        )
        .describe("Echo of a CS command")
        .emits("Volume")
        .capture("controller", 1usize, FieldKind::Int)
        .capture("raw", 2usize, FieldKind::Int)
        .correlate(by_controller()),
        ResponseRule::new("bare_value", Pattern::regex(r"^(\d+)$")?)
            .describe("Answer to GS")
            .emits("Volume")
            .capture("raw", 1usize, FieldKind::Int)
            .correlate(
                Correlation::keyed_by("controller")
                    .infer_key()
                    .when_pending("GetState", "Volume", as_volume),
            ),
        ResponseRule::new("preset", Pattern::regex(r"(?i)^LP\s+(\d+)$")?)
            .describe("Recalled preset")
            .emits("Preset")
            .capture("preset", 1usize, FieldKind::Int),
    ];

    DriverProfile::new(
        DriverMetadata::new("Symetrix Radius NX", "Symetrix", "1.0.1")
            .describe("Symetrix Radius NX series DSP over the composer control protocol"),
        TransportHint::tcp(48631),
        Framing::lines(LineTerminator::Any),
        commands,
        responses,
    )
}

fn by_controller() -> Correlation {
    Correlation::keyed_by("controller")
        .when_pending("Mute", "Mute", as_mute)
        .when_pending("Volume", "Volume", as_volume)
        .when_pending("GetState", "Volume", as_volume)
        .otherwise("Volume", as_volume)
}

fn as_mute(fields: &Fields) -> Option<Fields> {
    let state = match fields.get("raw")?.as_integer()? {
        MUTE_ON => true,
        MUTE_OFF => false,
        _ => return None,
    };
    Some(Fields::from([
        ("controller".to_string(), fields.get("controller")?.clone()),
        ("state".to_string(), Value::Bool(state)),
    ]))
}

fn as_volume(fields: &Fields) -> Option<Fields> {
    let raw = fields.get("raw")?.as_integer()?;
    let percent = (raw as f64 / RAW_FULL_SCALE * 100.0).round() as i64;
    Some(Fields::from([
        ("controller".to_string(), fields.get("controller")?.clone()),
        ("value".to_string(), Value::Integer(percent)),
    ]))
}
