//! Crashguard - in-vehicle crash detection and emergency broadcast
//!
//! Watches an acceleration sensor and, on a confirmed impact, broadcasts an
//! emergency message and voice call to every registered contact, retrying
//! until all of them are reached.
//!
//! Module structure:
//! - `domain/` - Core types (SensorReading, Recipient, CallStatus, Episode)
//! - `io/` - External interfaces (serial sensor, Twilio, geocoding, status)
//! - `services/` - Business logic (MonitorLoop, BroadcastCoordinator)
//! - `infra/` - Infrastructure (Config)

use anyhow::Context;
use clap::Parser;
use crashguard::domain::types::Phase;
use crashguard::infra::Config;
use crashguard::io::{
    create_status_channel, ReverseGeocoder, SerialSensor, StatusReporter, TwilioClient,
};
use crashguard::services::{BroadcastCoordinator, MonitorLoop};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Crashguard - vehicle crash detection and emergency broadcast
#[derive(Parser, Debug)]
#[command(name = "crashguard", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("crashguard starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        sensor_device = %config.sensor_device(),
        sensor_baud = %config.sensor_baud(),
        impact_threshold = %config.impact_threshold(),
        countdown_secs = %config.countdown_secs(),
        retry_interval_secs = %config.retry_interval_secs(),
        call_spacing_ms = %config.call_spacing_ms(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Without a transport session no emergency can ever go out; refuse to start
    let transport =
        Arc::new(TwilioClient::new(&config).context("failed to construct transport session")?);
    let geocoder =
        Arc::new(ReverseGeocoder::new(&config).context("failed to construct geocode client")?);

    let (status, status_rx) = create_status_channel();

    // An unreachable sensor at startup is reported on the status boundary
    // and then waits for operator intervention
    let sensor = match SerialSensor::open(&config).await {
        Ok(sensor) => sensor,
        Err(e) => {
            error!(error = %e, "sensor_unavailable");
            status.set_phase(Phase::ManualRestartRequired);
            let reporter = StatusReporter::new(status_rx, config.heartbeat_interval_secs());
            reporter.run(shutdown_rx).await;
            return Ok(());
        }
    };

    let coordinator = BroadcastCoordinator::new(transport.clone(), geocoder, &config);
    let monitor =
        MonitorLoop::new(&config, sensor, coordinator, transport, status, shutdown_rx);

    // Run the monitor - detects, confirms, and broadcasts until shutdown
    monitor.run().await;

    info!("crashguard shutdown complete");
    Ok(())
}
