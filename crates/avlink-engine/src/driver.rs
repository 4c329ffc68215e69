/*!
 * Driver façade.
 *
 * A `DriverProfile` is the static description of one vendor protocol: its
 * command table, framing and response rules. A `Driver` is one live instance
 * of a profile, owning the per-connection state (the splitter buffer and the
 * pending requests). Profiles are shared; drivers are not.
 */
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace};

use avlink_core::config::DriverSettings;
use avlink_core::logging::operation_span;
use avlink_core::types::{Id, Value};

use crate::clock::{Clock, SystemClock};
use crate::correlator::{Correlator, PendingRequest};
use crate::encode::{encode, Payload};
use crate::error::{Error, Result};
use crate::matcher::{Event, ResponseRule};
use crate::schema::{CommandSpec, CommandTable, CorrelationKey, FollowUp, ParamSpec};
use crate::split::{Framing, Splitter};
use crate::validate::{validate, Args, ValidatedArgs};

/// Descriptive information about a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverMetadata {
    /// Display name
    pub name: String,
    /// Device manufacturer
    pub manufacturer: String,
    /// Driver version
    pub version: String,
    /// Optional description
    pub description: Option<String>,
}

impl DriverMetadata {
    /// Create metadata without a description
    pub fn new<N, M, V>(name: N, manufacturer: M, version: V) -> Self
    where
        N: Into<String>,
        M: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            manufacturer: manufacturer.into(),
            version: version.into(),
            description: None,
        }
    }

    /// Set the description
    pub fn describe<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Transport the device is normally reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP socket
    Tcp,
    /// UDP datagrams
    Udp,
    /// Serial line
    Serial,
    /// HTTP requests
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Serial => "serial",
            TransportKind::Http => "http",
        };
        write!(f, "{}", name)
    }
}

/// Default transport suggested to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportHint {
    /// Transport kind
    pub kind: TransportKind,
    /// Default port, for network transports
    pub port: Option<u16>,
}

impl TransportHint {
    /// TCP on `port`
    pub fn tcp(port: u16) -> Self {
        Self {
            kind: TransportKind::Tcp,
            port: Some(port),
        }
    }

    /// UDP on `port`
    pub fn udp(port: u16) -> Self {
        Self {
            kind: TransportKind::Udp,
            port: Some(port),
        }
    }

    /// Serial line
    pub fn serial() -> Self {
        Self {
            kind: TransportKind::Serial,
            port: None,
        }
    }

    /// HTTP on `port`
    pub fn http(port: u16) -> Self {
        Self {
            kind: TransportKind::Http,
            port: Some(port),
        }
    }
}

/// Static description of one vendor protocol
#[derive(Debug, Clone)]
pub struct DriverProfile {
    /// Metadata
    pub metadata: DriverMetadata,
    /// Default transport
    pub transport: TransportHint,
    /// Inbound framing
    pub framing: Framing,
    /// Commands
    pub commands: CommandTable,
    /// Response rules, in evaluation order
    pub responses: Vec<ResponseRule>,
}

impl DriverProfile {
    /// Assemble and check a profile
    pub fn new(
        metadata: DriverMetadata,
        transport: TransportHint,
        framing: Framing,
        commands: Vec<CommandSpec>,
        responses: Vec<ResponseRule>,
    ) -> Result<Self> {
        check_framing(&framing)?;

        let mut ids = HashSet::new();
        for rule in &responses {
            if !ids.insert(rule.id.as_str()) {
                return Err(Error::configuration(format!(
                    "{}: duplicate response rule '{}'",
                    metadata.name, rule.id
                )));
            }
        }

        Ok(Self {
            commands: CommandTable::new(commands)?,
            metadata,
            transport,
            framing,
            responses,
        })
    }

    /// Look up a response rule
    pub fn rule(&self, id: &str) -> Option<&ResponseRule> {
        self.responses.iter().find(|r| r.id == id)
    }
}

fn check_framing(framing: &Framing) -> Result<()> {
    match framing {
        Framing::Fixed { length, end, .. } => {
            let least = if end.is_some() { 2 } else { 1 };
            if *length < least {
                return Err(Error::configuration(format!(
                    "fixed frames of length {} cannot hold their markers",
                    length
                )));
            }
        }
        Framing::Terminated { max_length, .. } if *max_length < 2 => {
            return Err(Error::configuration(format!(
                "terminated frames need a maximum length of at least 2, got {}",
                max_length
            )));
        }
        _ => {}
    }
    Ok(())
}

/// A deferred command the host should build later
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpRequest {
    /// Identifier used to cancel the follow-up
    pub id: Id,
    /// Command to build
    pub command: String,
    /// Arguments for the command
    pub args: Args,
    /// Delay before building
    pub delay: Duration,
}

/// Result of building a command
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    /// Payload to send
    pub payload: Payload,
    /// Deferred re-query, if the command declares one
    pub follow_up: Option<FollowUpRequest>,
}

/// Summary of one command in a description
#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    /// Command name
    pub name: String,
    /// Description
    pub description: Option<String>,
    /// Parameters
    pub parameters: Vec<ParamSpec>,
    /// Encoding kind
    pub encoding: &'static str,
    /// Shape left pending after sending
    pub expects: Option<String>,
    /// Command scheduled after sending
    pub follow_up: Option<String>,
}

/// Summary of one response rule in a description
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    /// Rule id
    pub id: String,
    /// Event type emitted
    pub event_type: String,
    /// Description
    pub description: Option<String>,
    /// Pattern source
    pub pattern: String,
    /// Whether the rule consults pending requests
    pub correlated: bool,
}

/// What a driver offers, for the host's UI and logs
#[derive(Debug, Clone, Serialize)]
pub struct Description {
    /// Metadata
    pub metadata: DriverMetadata,
    /// Default transport
    pub transport: TransportHint,
    /// Framing label
    pub framing: &'static str,
    /// Commands in declaration order
    pub commands: Vec<CommandInfo>,
    /// Response rules in evaluation order
    pub responses: Vec<RuleInfo>,
}

/// A live driver instance for one device connection
#[derive(Debug)]
pub struct Driver {
    profile: Arc<DriverProfile>,
    settings: DriverSettings,
    splitter: Splitter,
    correlator: Correlator,
    clock: Arc<dyn Clock>,
}

impl Driver {
    /// Create a driver from a profile
    pub fn new(profile: Arc<DriverProfile>, settings: DriverSettings) -> Self {
        info!(
            driver = %profile.metadata.name,
            commands = profile.commands.len(),
            rules = profile.responses.len(),
            framing = profile.framing.label(),
            "Created driver"
        );
        Self {
            splitter: Splitter::new(profile.framing, settings.max_line_length),
            correlator: Correlator::new(settings.stale_eviction()),
            profile,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` instead of the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The profile
    pub fn profile(&self) -> &Arc<DriverProfile> {
        &self.profile
    }

    /// The settings
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Validate and encode a command
    pub fn build_command(&mut self, name: &str, args: &Args) -> Result<Payload> {
        self.build(name, args).map(|built| built.payload)
    }

    /// Validate and encode a command, returning any follow-up it declares
    ///
    /// A pending request is recorded only once the payload was produced.
    pub fn build(&mut self, name: &str, args: &Args) -> Result<BuiltCommand> {
        let span = operation_span("build_command", &self.profile.metadata.name);
        let _enter = span.enter();

        let spec = self
            .profile
            .commands
            .get(name)
            .ok_or_else(|| Error::unknown_command(name))?;
        let validated = validate(spec, args, self.settings.on_range_violation)?;
        let payload = encode(spec, &validated)?;
        debug!(command = %name, payload = %payload, "Encoded command");

        if let Some(expectation) = &spec.expects {
            let key = match &expectation.key {
                CorrelationKey::Param(param) => validated.get(param).map(Value::to_string),
                CorrelationKey::Fixed(key) => Some(key.clone()),
            };
            match key {
                Some(key) => {
                    self.correlator
                        .register(key, &expectation.shape, name, self.clock.now());
                }
                None => debug!(command = %name, "No correlation key supplied, nothing left pending"),
            }
        }

        let follow_up = spec
            .follow_up
            .as_ref()
            .and_then(|follow_up| follow_up_request(follow_up, &validated));

        Ok(BuiltCommand { payload, follow_up })
    }

    /// Feed inbound bytes and collect the resulting events
    ///
    /// Stale requests are evicted before the chunk is looked at, so an answer
    /// arriving after the window is treated as unsolicited.
    pub fn on_data(&mut self, bytes: &[u8]) -> Vec<Event> {
        let span = operation_span("on_data", &self.profile.metadata.name);
        let _enter = span.enter();

        let now = self.clock.now();
        let mut events = self.correlator.evict_stale(now);

        let feed = self.splitter.feed(bytes);
        if feed.discarded > 0 {
            events.push(Event::FrameResyncDiscard {
                discarded: feed.discarded,
            });
        }

        for unit in feed.units {
            let before = events.len();
            for rule in &self.profile.responses {
                if let Some(fields) = rule.apply(&unit) {
                    events.extend(self.correlator.resolve(rule, fields, now));
                }
            }

            let recognized = events[before..]
                .iter()
                .any(|e| matches!(e, Event::Response { .. }));
            if !recognized {
                trace!(unit = %unit, "Unrecognized unit");
                events.push(Event::Unrecognized { unit });
            }
        }

        events
    }

    /// Evict stale requests without new data
    pub fn poll(&mut self) -> Vec<Event> {
        self.correlator.evict_stale(self.clock.now())
    }

    /// Drop buffered bytes and pending requests, as after a reconnect
    pub fn reset(&mut self) {
        debug!(
            driver = %self.profile.metadata.name,
            buffered = self.splitter.remainder().len(),
            pending = self.correlator.len(),
            "Reset driver state"
        );
        self.splitter.reset();
        self.correlator.clear();
    }

    /// Number of pending requests
    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    /// The pending request for `key`
    pub fn pending(&self, key: &str) -> Option<&PendingRequest> {
        self.correlator.pending(key)
    }

    /// Describe the driver
    pub fn describe(&self) -> Description {
        let profile = &self.profile;
        Description {
            metadata: profile.metadata.clone(),
            transport: profile.transport,
            framing: profile.framing.label(),
            commands: profile
                .commands
                .iter()
                .map(|c| CommandInfo {
                    name: c.name.clone(),
                    description: c.description.clone(),
                    parameters: c.parameters.clone(),
                    encoding: c.encoding.label(),
                    expects: c.expects.as_ref().map(|e| e.shape.clone()),
                    follow_up: c.follow_up.as_ref().map(|f| f.command.clone()),
                })
                .collect(),
            responses: profile
                .responses
                .iter()
                .map(|r| RuleInfo {
                    id: r.id.clone(),
                    event_type: r.event_type.clone(),
                    description: r.description.clone(),
                    pattern: r.pattern.source(),
                    correlated: r.correlation.is_some(),
                })
                .collect(),
        }
    }
}

fn follow_up_request(follow_up: &FollowUp, validated: &ValidatedArgs) -> Option<FollowUpRequest> {
    if let Some(param) = &follow_up.when_param {
        if !validated.get(param).and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }
    }

    let delay_ms = follow_up
        .delay_param
        .as_ref()
        .and_then(|param| validated.get(param))
        .and_then(Value::as_float)
        .map(|ms| ms.max(0.0).round() as u64)
        .unwrap_or(follow_up.delay_ms)
        .max(follow_up.min_delay_ms);

    let args: Args = follow_up
        .forward
        .iter()
        .filter_map(|name| validated.get(name).map(|v| (name.clone(), v.clone())))
        .collect();

    Some(FollowUpRequest {
        id: Id::new(),
        command: follow_up.command.clone(),
        args,
        delay: Duration::from_millis(delay_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::correlator::Correlation;
    use crate::error::ValidationError;
    use crate::matcher::{FieldKind, Fields, Pattern};
    use crate::schema::{Expectation, ParamSpec};
    use crate::split::LineTerminator;
    use crate::args;
    use avlink_core::config::RangePolicy;

    fn as_mute(fields: &Fields) -> Option<Fields> {
        let state = match fields.get("raw")?.as_integer()? {
            0 => false,
            65535 => true,
            _ => return None,
        };
        Some(Fields::from([
            ("channel".to_string(), fields.get("channel")?.clone()),
            ("state".to_string(), Value::Bool(state)),
        ]))
    }

    fn as_level(fields: &Fields) -> Option<Fields> {
        Some(Fields::from([
            ("channel".to_string(), fields.get("channel")?.clone()),
            ("level".to_string(), fields.get("raw")?.clone()),
        ]))
    }

    fn profile() -> Arc<DriverProfile> {
        let commands = vec![
            CommandSpec::text("SetMute", "MUTE ${channel} ${state}\r")
                .param(ParamSpec::number("channel").required().range(1.0, 16.0))
                .param(ParamSpec::boolean("state").required()),
            CommandSpec::text("SetLevel", "LVL ${channel} ${level}\r")
                .param(ParamSpec::number("channel").required().range(1.0, 16.0))
                .param(ParamSpec::number("level").required().range(0.0, 100.0))
                .param(ParamSpec::boolean("verify").with_default(false))
                .param(ParamSpec::number("settle_ms").with_default(800))
                .follow_up(
                    FollowUp::new("GetState", 800)
                        .when("verify")
                        .delay_from("settle_ms", 100)
                        .forwarding(["channel"]),
                ),
            CommandSpec::text("GetMute", "GM ${channel}\r")
                .param(ParamSpec::number("channel").required())
                .expects(Expectation::keyed_by("channel", "Mute")),
            CommandSpec::text("GetState", "GS ${channel}\r")
                .param(ParamSpec::number("channel").required())
                .expects(Expectation::keyed_by("channel", "Level")),
        ];
        let responses = vec![
            ResponseRule::new("mute_echo", Pattern::regex(r"^MUTE (\d+) (\d)$").unwrap())
                .emits("Mute")
                .capture("channel", 1usize, FieldKind::Int)
                .capture("state", 2usize, FieldKind::Int),
            ResponseRule::new("channel_value", Pattern::regex(r"^#(\d+)=(\d+)$").unwrap())
                .capture("channel", 1usize, FieldKind::Int)
                .capture("raw", 2usize, FieldKind::Int)
                .correlate(
                    Correlation::keyed_by("channel")
                        .when_pending("Mute", "Mute", as_mute)
                        .otherwise("Level", as_level),
                ),
        ];
        Arc::new(
            DriverProfile::new(
                DriverMetadata::new("Test DSP", "Acme", "1.0.0"),
                TransportHint::tcp(5000),
                Framing::lines(LineTerminator::Cr),
                commands,
                responses,
            )
            .unwrap(),
        )
    }

    fn driver() -> (Driver, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let driver = Driver::new(profile(), DriverSettings::default()).with_clock(clock.clone());
        (driver, clock)
    }

    #[test]
    fn test_echo_round_trip() {
        let (mut driver, _) = driver();
        let payload = tokio_test::assert_ok!(
            driver.build_command("SetMute", &args! { "channel" => 3, "state" => 1 })
        );
        assert_eq!(payload.as_text(), Some("MUTE 3 1\r"));

        let events = driver.on_data(payload.as_bytes());
        assert_eq!(events.len(), 1);
        assert!(events[0].is("Mute"));
        assert_eq!(events[0].field("channel"), Some(&Value::Integer(3)));
        assert_eq!(events[0].field("state"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_unknown_command_and_validation_errors() {
        let (mut driver, _) = driver();
        assert!(matches!(
            driver.build_command("Reboot", &args! {}),
            Err(Error::UnknownCommand(name)) if name == "Reboot"
        ));
        assert!(matches!(
            driver.build_command("SetMute", &args! { "channel" => 3 }),
            Err(Error::Validation(ValidationError::MissingRequiredParameter { .. }))
        ));
        assert!(matches!(
            driver.build_command("SetLevel", &args! { "channel" => 1, "level" => 101 }),
            Err(Error::Validation(ValidationError::OutOfRange { .. }))
        ));
    }

    #[test]
    fn test_clamp_policy_from_settings() {
        let settings = DriverSettings::default().with_range_policy(RangePolicy::Clamp);
        let mut driver = Driver::new(profile(), settings);
        let payload = driver
            .build_command("SetLevel", &args! { "channel" => 1, "level" => 140 })
            .unwrap();
        assert_eq!(payload.as_text(), Some("LVL 1 100\r"));
    }

    #[test]
    fn test_failed_build_leaves_nothing_pending() {
        let (mut driver, _) = driver();
        assert!(driver.build_command("GetMute", &args! {}).is_err());
        assert_eq!(driver.pending_count(), 0);

        driver.build_command("GetMute", &args! { "channel" => 2 }).unwrap();
        assert_eq!(driver.pending("2").unwrap().expected, "Mute");
    }

    #[test]
    fn test_sentinel_resolves_by_pending_shape() {
        let (mut driver, _) = driver();
        driver.build_command("GetMute", &args! { "channel" => 2 }).unwrap();

        let events = driver.on_data(b"#2=65535\r");
        assert!(events[0].is("Mute"));
        assert_eq!(events[0].field("state"), Some(&Value::Bool(true)));
        assert_eq!(driver.pending_count(), 0);

        let events = driver.on_data(b"#2=65535\r");
        assert!(events[0].is("Level"));
    }

    #[test_log::test]
    fn test_eviction_boundary() {
        let (mut driver, clock) = driver();
        driver.build_command("GetMute", &args! { "channel" => 2 }).unwrap();
        clock.advance_ms(4999);
        let events = driver.on_data(b"#2=0\r");
        assert_eq!(events.len(), 1);
        assert!(events[0].is("Mute"));

        driver.build_command("GetMute", &args! { "channel" => 2 }).unwrap();
        clock.advance_ms(5001);
        let events = driver.on_data(b"#2=0\r");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "RequestEvicted");
        assert!(events[1].is("Level"));
    }

    #[test]
    fn test_poll_evicts_without_data() {
        let (mut driver, clock) = driver();
        driver.build_command("GetState", &args! { "channel" => 4 }).unwrap();
        assert!(driver.poll().is_empty());
        clock.advance_ms(6000);
        let events = driver.poll();
        assert!(matches!(
            &events[..],
            [Event::RequestEvicted { key, command, .. }] if key == "4" && command == "GetState"
        ));
        assert_eq!(driver.pending_count(), 0);
    }

    #[test]
    fn test_partial_units_and_reset() {
        let (mut driver, _) = driver();
        assert!(driver.on_data(b"MUTE 1").is_empty());
        let events = driver.on_data(b" 0\rnoise\r");
        assert!(events[0].is("Mute"));
        assert_eq!(events[1].event_type(), "Unrecognized");

        driver.on_data(b"MUTE 1");
        driver.build_command("GetMute", &args! { "channel" => 1 }).unwrap();
        driver.reset();
        assert_eq!(driver.pending_count(), 0);
        assert_eq!(driver.on_data(b" 0\r")[0].event_type(), "Unrecognized");
    }

    #[test]
    fn test_follow_up() {
        let (mut driver, _) = driver();
        let built = driver
            .build("SetLevel", &args! { "channel" => 1, "level" => 50 })
            .unwrap();
        assert!(built.follow_up.is_none());

        let built = driver
            .build("SetLevel", &args! { "channel" => 1, "level" => 50, "verify" => true })
            .unwrap();
        let follow_up = built.follow_up.unwrap();
        assert_eq!(follow_up.command, "GetState");
        assert_eq!(follow_up.delay, Duration::from_millis(800));
        assert_eq!(follow_up.args, args! { "channel" => 1 });

        let built = driver
            .build(
                "SetLevel",
                &args! { "channel" => 1, "level" => 50, "verify" => true, "settle_ms" => 20 },
            )
            .unwrap();
        assert_eq!(built.follow_up.unwrap().delay, Duration::from_millis(100));

        let payload = driver.build_command(&follow_up.command, &follow_up.args).unwrap();
        assert_eq!(payload.as_text(), Some("GS 1\r"));
    }

    #[test]
    fn test_describe() {
        let (driver, _) = driver();
        let description = driver.describe();
        assert_eq!(description.metadata.manufacturer, "Acme");
        assert_eq!(description.framing, "line");
        assert_eq!(description.commands.len(), 4);
        assert_eq!(description.commands[2].expects.as_deref(), Some("Mute"));
        assert!(description.responses[1].correlated);

        let json = serde_json::to_value(&description).unwrap();
        assert_eq!(json["transport"]["kind"], "tcp");
        assert_eq!(json["transport"]["port"], 5000);
        assert_eq!(json["commands"][0]["parameters"][0]["name"], "channel");
    }

    #[test]
    fn test_profile_checks() {
        let meta = || DriverMetadata::new("Broken", "Acme", "0.1.0");
        assert!(matches!(
            DriverProfile::new(meta(), TransportHint::serial(), Framing::fixed(0xFE, 1, 0xFC), vec![], vec![]),
            Err(Error::Configuration(_))
        ));

        let rule = || ResponseRule::new("Ack", Pattern::regex("OK").unwrap());
        assert!(matches!(
            DriverProfile::new(
                meta(),
                TransportHint::serial(),
                Framing::lines(LineTerminator::Cr),
                vec![],
                vec![rule(), rule()],
            ),
            Err(Error::Configuration(_))
        ));
    }
}
