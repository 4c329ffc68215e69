//! Drive a VISCA camera profile without a network.
//!
//! Builds a verified absolute move, lets the follow-up scheduler fire the
//! position query and feeds a canned camera reply back into the driver.
//!
//! Run with `RUST_LOG=debug cargo run --example ptz_session`.

use std::time::Duration;

use anyhow::Context;
use avlink_core::config::ConfigBuilder;
use avlink_core::logging;
use avlink_devices::drivers::visca;
use avlink_devices::DriverCatalog;
use avlink_engine::{args, Event, FollowUpScheduler};
use tracing::info;

/// What a camera at address 1 answers when it sits at pan 90, tilt -20
const POSITION_REPLY: [u8; 11] = [
    0x90, 0x50, 0x00, 0x0F, 0x0F, 0x00, 0x0F, 0x0C, 0x07, 0x05, 0xFF,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .with_environment_prefix("AVLINK")
        .build()?;
    logging::init_from_config(&config.logging)?;

    let catalog = DriverCatalog::with_builtin()?;
    for name in catalog.names()? {
        let profile = catalog.profile(&name)?;
        info!(
            driver = %name,
            transport = %profile.transport.kind,
            commands = profile.commands.len(),
            "Available driver"
        );
    }

    let mut camera = catalog.instantiate(visca::NAME, config.driver.clone())?;
    println!("{}", serde_json::to_string_pretty(&camera.describe())?);

    let (scheduler, mut due) = FollowUpScheduler::new();

    let built = camera.build(
        "MoveAbsolute",
        &args! { "panDegrees" => 90, "tiltDegrees" => -20, "verify" => true, "settleMs" => 250 },
    )?;
    info!(payload = %built.payload, "Send to camera");
    if let Some(follow_up) = built.follow_up {
        scheduler.schedule(follow_up);
    }

    // Camera acknowledges and completes the move
    for event in camera.on_data(&[0x90, 0x41, 0xFF, 0x90, 0x51, 0xFF]) {
        info!(event = ?event, "Camera event");
    }

    let request = tokio::time::timeout(Duration::from_secs(2), due.recv())
        .await
        .context("follow-up never fired")?
        .context("scheduler closed")?;
    let query = camera.build_command(&request.command, &request.args)?;
    info!(command = %request.command, payload = %query, "Send follow-up to camera");

    for event in camera.on_data(&POSITION_REPLY) {
        if let Event::Response { event_type, fields, .. } = &event {
            info!(event_type = %event_type, fields = ?fields, "Camera reported");
        }
    }

    scheduler.cancel_all();
    Ok(())
}
