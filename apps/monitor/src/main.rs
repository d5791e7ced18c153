//! Connects to a console and logs game, race and driver events.
//!
//! Configuration comes from `GT7_*` environment variables, logging from
//! `RUST_LOG`.

use anyhow::Context;
use gt7_events::{DriverEvent, GameEvent, RaceEvent};
use gt7_link::{Client, ClientConfig};
use gt7_model::format_lap_time;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClientConfig::from_env().context("reading GT7_* environment")?;
    let client = Client::connect_blocking(config).context("connecting to console")?;
    info!(console = %client.console_ip(), "connected");

    client.game_events().subscribe_all(|e: &GameEvent| {
        info!(from = ?e.previous, to = ?e.mode, "game mode");
        Ok(())
    });
    client.race_events().subscribe_all(|e: &RaceEvent| {
        match e {
            RaceEvent::BestLapTime { ms: Some(ms) } => {
                info!(best = %format_lap_time(*ms), "best lap")
            }
            RaceEvent::LastLapTime { ms: Some(ms) } => {
                info!(last = %format_lap_time(*ms), "last lap")
            }
            other => info!(event = ?other, "race"),
        }
        Ok(())
    });
    client.driver_events().subscribe_all(|e: &DriverEvent| {
        info!(event = ?e, "driver");
        Ok(())
    });

    client.run().context("telemetry session")?;
    let counts = client.frame_counts();
    info!(
        received = counts.received,
        dropped = counts.dropped,
        timeouts = counts.timeouts,
        "session ended"
    );
    Ok(())
}
