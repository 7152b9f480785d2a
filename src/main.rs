//! # Joystick Poller
//!
//! Polls Linux joysticks in the background and reports what the host would
//! see: connect/disconnect notifications and periodic pad snapshots.

use anyhow::{Context, Result};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use joystick_poller::config::Config;
use joystick_poller::engine::JoystickHandler;
use joystick_poller::pad::STATUS_CONNECTED;

/// How often the host side checks the pad records
const HOST_POLL_INTERVAL_MS: u64 = 100;

/// Number of host polls between snapshot log messages
const SNAPSHOT_INTERVAL_POLLS: u64 = 50;

/// Main entry point for the joystick poller
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration from the path given as the first argument, or
///      use defaults
///    - Set up logging with tracing subscriber
///    - Start the joystick handler with `engine.max_slots` slots
///
/// 2. **Main Loop**
///    - Acknowledge assign-changed bits and log connects/disconnects
///    - Log a snapshot of every connected pad every 50 polls (~5 seconds)
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Close the handler, releasing every device
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded or the poll thread
/// cannot be started.
///
/// # Examples
///
/// ```bash
/// joystick-poller config/joystick.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO joystick_poller: Joystick Poller v0.1.0 starting...
/// INFO joystick_poller::registry: Joystick #0 connected: Wireless Controller at /dev/input/by-id/...
/// INFO joystick_poller: Pad #0 connected
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            Config::load(&path).with_context(|| format!("Failed to load configuration from {}", path))?
        }
        None => Config::default(),
    };

    let level: tracing::Level = config.logging.level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    info!("Joystick Poller v{} starting...", env!("CARGO_PKG_VERSION"));

    let slots = config.engine.max_slots;
    let mut handler = JoystickHandler::new(config);
    handler.init(slots)?;

    let mut host_interval = interval(Duration::from_millis(HOST_POLL_INTERVAL_MS));
    let mut polls: u64 = 0;

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = host_interval.tick() => {
                polls += 1;
                report_changes(&handler);

                if polls % SNAPSHOT_INTERVAL_POLLS == 0 {
                    log_snapshots(&handler);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    handler.close();
    Ok(())
}

/// Acknowledge assign-changed bits and log the new connection state
fn report_changes(handler: &JoystickHandler) {
    for (slot, pad) in handler.pads().iter().enumerate() {
        if !pad.assign_changed() {
            continue;
        }

        let status = pad.acknowledge();
        if status & STATUS_CONNECTED != 0 {
            info!("Pad #{} connected", slot);
        } else {
            warn!("Pad #{} disconnected", slot);
        }
    }
}

fn log_snapshots(handler: &JoystickHandler) {
    debug!(
        "{} of {} pad(s) connected",
        handler.info().now_connect(),
        handler.info().max_connect()
    );

    for (slot, pad) in handler.pads().iter().enumerate() {
        if !pad.is_connected() {
            continue;
        }

        let snapshot = pad.snapshot();
        let pressed: Vec<_> = snapshot
            .buttons
            .iter()
            .filter(|(_, pressed, _)| *pressed)
            .map(|(button, _, _)| button)
            .collect();
        debug!("Pad #{}: buttons {:?}, sticks {:?}", slot, pressed, snapshot.sticks);
    }
}
