//! Entrypoint: load configuration, connect the bus, and run the camera
//! orchestrator until the process receives a shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use seone_camera_driver::bus::{run_dispatch_loop, MqttBus};
use seone_camera_driver::config::{Cli, Settings};
use seone_camera_driver::orchestrator::Orchestrator;

/// Control-command channel depth between the bus dispatch loop and the
/// orchestrator; generous enough that a burst of requests never blocks the
/// MQTT event loop.
const CONTROL_CHANNEL_CAPACITY: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli).context("failed to load configuration")?;

    env_logger::Builder::new()
        .parse_filters(&settings.log_level)
        .init();

    log::info!(
        "starting seone-camera-driver, serial={} framerate={}",
        settings.serial_number,
        settings.camera_framerate
    );

    let (bus, event_loop) = MqttBus::connect(&settings);
    let bus = Arc::new(bus);
    bus.subscribe_control_topics()
        .await
        .context("failed to subscribe to control topics")?;

    let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

    let dispatch_handle = tokio::spawn(run_dispatch_loop(event_loop, bus.clone(), control_tx));

    let orchestrator = Orchestrator::new(bus, control_rx, settings.camera_framerate, settings.mzi_rate);
    let orchestrator_handle = tokio::spawn(orchestrator.run());

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            log::info!("received SIGTERM, shutting down");
        }
        result = orchestrator_handle => {
            if let Err(e) = result {
                log::error!("orchestrator task panicked: {e}");
            }
        }
        result = dispatch_handle => {
            if let Err(e) = result {
                log::error!("bus dispatch task panicked: {e}");
            }
        }
    }

    log::info!("seone-camera-driver stopped");
    Ok(())
}
