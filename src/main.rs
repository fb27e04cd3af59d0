//! # EMTB Remote Receiver
//!
//! Board-side receiver: takes remote intents from the radio modem and drives
//! the VESC motor controller over UART.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first argument, default `config/default.toml`)
//!    - Set up logging with tracing subscriber, optionally to a daily file
//!    - Open the motor controller and radio modem serial ports
//!
//! 2. **Main Loop**
//!    - Run one receiver tick at `tick_rate_hz`
//!    - Log link and frame counters every few seconds
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Send zero current in both directions
//!    - Log final counters
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- config/default.toml
//! ```

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use emtb_remote::config::{Config, LoggingConfig};
use emtb_remote::radio::SerialRadio;
use emtb_remote::receiver::ReceiverBridge;
use emtb_remote::serial::VescSerial;
use emtb_remote::telemetry::TelemetryLogger;

/// Configuration file used when none is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Seconds between status log messages
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Tick period for a control loop rate
fn tick_period(tick_rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(tick_rate_hz.max(1)))
}

fn load_config(path: &str) -> Result<Config> {
    if !Path::new(path).exists() && path == DEFAULT_CONFIG_PATH {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("Failed to load configuration from {}", path))
}

/// Set up stdout logging and, if configured, a daily rolling log file.
///
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stdout = tracing_subscriber::fmt::layer();

    match &config.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "emtb-remote.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(stdout)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter()).with(stdout).init();
            None
        }
    }
}

/// Main entry point for the receiver
///
/// # Errors
///
/// Returns error if:
/// - The configuration is invalid
/// - Either serial port cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    let _log_guard = init_logging(&config.logging);

    info!("EMTB Remote v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path);

    let serial = VescSerial::open(&config.serial)?;
    let radio = SerialRadio::open(&config.radio)?;

    let logger = if config.telemetry.enabled {
        match TelemetryLogger::new(&config.telemetry) {
            Ok(logger) => Some(logger),
            Err(e) => {
                warn!("Telemetry logging disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut bridge = ReceiverBridge::new(&config, serial, Box::new(radio), logger);

    let mut ticker = interval(tick_period(config.control.tick_rate_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Starting receiver loop at {}Hz", config.control.tick_rate_hz);
    info!("Press Ctrl+C to exit");

    let mut ticks: u64 = 0;
    let mut last_status = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                if let Err(e) = bridge.tick(now).await {
                    warn!("Receiver tick failed: {}", e);
                    continue;
                }
                ticks += 1;

                if now.saturating_duration_since(last_status) >= STATUS_INTERVAL {
                    let supervisor = bridge.supervisor();
                    info!(
                        "{} ticks, link {}, {} messages, {} losses, {} radio errors, frames {:?}",
                        ticks,
                        if supervisor.is_fresh() { "fresh" } else { "stale" },
                        supervisor.messages(),
                        supervisor.link_losses(),
                        bridge.radio_errors(),
                        bridge.serial().counters()
                    );
                    last_status = now;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Err(e) = bridge.stop().await {
        warn!("Failed to send final neutral command: {}", e);
    }

    let supervisor = bridge.supervisor();
    info!(
        "Total: {} ticks, {} radio messages, {} dropped, {} link losses, frames {:?}",
        ticks,
        supervisor.messages(),
        supervisor.dropped(),
        supervisor.link_losses(),
        bridge.serial().counters()
    );

    Ok(())
}
