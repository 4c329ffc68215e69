/*!
 * Kramer Protocol 3000.
 *
 * Replies look like `~01@<COMMAND> <args>`. A single read often carries
 * several of them, one per line.
 */
use avlink_engine::{
    CommandSpec, Correlation, DriverMetadata, DriverProfile, Expectation, FieldKind, Fields,
    Framing, LineTerminator, ParamSpec, Pattern, ResponseRule, Result, TransportHint, Transform,
    UnitMatch, Value,
};

/// Catalog name
pub const NAME: &str = "kramer-p3000";

fn button() -> ParamSpec {
    ParamSpec::number("button")
        .required()
        .range(1.0, 20.0)
        .with_description("Button number (1-20)")
}

/// Build the profile
pub fn profile() -> Result<DriverProfile> {
    let commands = vec![
        CommandSpec::text("Reset", "#RESET\r").describe("Reset the device"),
        CommandSpec::text("GetButtonRGB", "#RGB? ${button}\r")
            .describe("Query the colour of a button")
            .param(button())
            .expects(Expectation::keyed_by("button", "RgbStatus")),
        CommandSpec::text("SetButton", "##BTN ${button},01,${action}\r")
            .describe("Press, release or hold a button")
            .param(button())
            .param(
                ParamSpec::string("action")
                    .one_of(["press", "release", "hold"])
                    .with_default("press"),
            )
            .transform(
                "action",
                Transform::lookup([("press", "P"), ("release", "R"), ("hold", "H")]),
            ),
    ];

    let responses = vec![
        ResponseRule::new("ResetOk", Pattern::regex(r"~01@RESET\s+OK")?)
            .describe("Reset acknowledged"),
        ResponseRule::new("ButtonEvent", Pattern::regex(r"~01@BTN\s+\d+,(\d+),([phr])")?)
            .describe("Button pressed, released or held")
            .extract_with(button_event),
        ResponseRule::new(
            "RgbStatus",
            Pattern::regex(r"~01@RGB\s+(\d+),(\d+),(\d+),(\d+),(\d+)")?,
        )
        .describe("Button colour")
        .capture("button", 1usize, FieldKind::Int)
        .capture("r", 2usize, FieldKind::Int)
        .capture("g", 3usize, FieldKind::Int)
        .capture("b", 4usize, FieldKind::Int)
        .capture("mode", 5usize, FieldKind::Int)
        .correlate(Correlation::keyed_by("button")),
    ];

    DriverProfile::new(
        DriverMetadata::new("Kramer3000", "Kramer", "1.0.0")
            .describe("Kramer devices speaking Protocol 3000"),
        TransportHint::tcp(50000),
        Framing::lines(LineTerminator::Any),
        commands,
        responses,
    )
}

fn button_event(found: &UnitMatch<'_>) -> Option<Fields> {
    let action = match found.group(2)? {
        "p" => "press",
        "r" => "release",
        _ => "hold",
    };
    Some(Fields::from([
        ("button".to_string(), Value::Integer(found.int(1)?)),
        ("action".to_string(), Value::from(action)),
    ]))
}
