//! Core application runner (business logic) for `swissinno-ble`.
//!
//! This module is intentionally decoupled from process setup and exit codes so
//! it can be tested deterministically with an injected advertisement source,
//! clock and output stream.

use crate::address::DeviceAddress;
use crate::config::{
    Config, ConfigError, DEFAULT_DEVICE_NAME, DeviceConfig, parse_device, parse_duration,
};
use crate::coordinator::TrapCoordinator;
use crate::freshness::Clock;
use crate::output::{self, OutputFormat, TrapReport};
use crate::reset::{CharacteristicWriter, ResetButton, ResetError};
use crate::scanner::{AdvertisementSource, ScanError};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

/// Listen to Swissinno mouse traps over Bluetooth LE.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Cli {
    /// Verbose output, log every advertisement and scan
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print trap readings as they change
    Watch(WatchOptions),
    /// Reset a triggered trap
    Reset(ResetOptions),
}

/// Configuration for the watch loop.
#[derive(Args, Debug, Clone)]
pub struct WatchOptions {
    /// TOML configuration file with devices and battery calibration
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Trap to watch, in addition to those in the configuration file.
    /// Format: --device AA:BB:CC:DD:EE:FF=Kitchen
    #[arg(long = "device", value_parser = parse_device, value_name = "ADDRESS=NAME")]
    pub devices: Vec<DeviceConfig>,

    /// Traps given with --device run on rechargeable cells, including those
    /// also listed in the configuration file
    #[arg(long)]
    pub rechargeable: bool,

    /// Poll interval for every trap, at least 30s.
    /// Accepts duration with suffix: 90s, 2m, 1h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "swissinno_trap")]
    pub influxdb_measurement: String,
}

impl WatchOptions {
    /// Load the configuration file, if any, and apply command-line overrides.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        for device in &self.devices {
            config.upsert_device(DeviceConfig {
                rechargeable: self.rechargeable,
                ..device.clone()
            });
        }

        if let Some(interval) = self.poll_interval {
            for device in &mut config.devices {
                device.poll_interval_secs = interval.as_secs();
            }
        }

        config.validate()?;
        Ok(config)
    }
}

/// Options for a one-off reset.
#[derive(Args, Debug, Clone)]
pub struct ResetOptions {
    /// Address of the trap
    pub address: DeviceAddress,

    /// Name used in log messages
    #[arg(long, default_value = DEFAULT_DEVICE_NAME)]
    pub name: String,
}

/// Errors returned by the runner.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Reset(#[from] ResetError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Watch the configured traps until `cancel` fires, writing a line to `out`
/// whenever a trap's reading or availability changes.
///
/// Each trap gets its own coordinator task. Poll failures are logged by the
/// coordinators and never end the loop.
pub async fn run_with_io(
    options: WatchOptions,
    source: Arc<dyn AdvertisementSource>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let config = options.load_config()?;
    let formatter = output::formatter(options.format, &options.influxdb_measurement);

    let mut names = HashMap::new();
    let mut updates = StreamMap::new();
    let mut tasks = Vec::with_capacity(config.devices.len());

    for device in &config.devices {
        tracing::info!(
            address = %device.address,
            name = %device.name,
            rechargeable = device.rechargeable,
            poll_interval = ?device.poll_interval(),
            "watching trap"
        );
        let coordinator = TrapCoordinator::new(
            device.clone(),
            config.profile_for(device),
            source.clone(),
            clock.clone(),
        );
        names.insert(device.address, device.name.clone());
        updates.insert(
            device.address,
            WatchStream::from_changes(coordinator.subscribe_updates()),
        );
        tasks.push(tokio::spawn(coordinator.run(cancel.child_token())));
    }

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = updates.next() => {
                let Some((address, snapshot)) = next else {
                    break Ok(());
                };
                let report = TrapReport {
                    address,
                    name: names.get(&address).cloned().unwrap_or_default(),
                    reading: snapshot.reading,
                    available: snapshot.available,
                    reported_at: clock.now(),
                };
                let line = formatter.format(&report);
                let written = writeln!(out, "{line}").and_then(|_| out.flush());
                if let Err(error) = written {
                    break Err(error);
                }
            }
        }
    };

    cancel.cancel();
    for task in tasks {
        if let Err(error) = task.await {
            tracing::error!(%error, "coordinator task failed");
        }
    }

    Ok(result?)
}

/// Reset one trap.
pub async fn run_reset(
    options: ResetOptions,
    writer: &dyn CharacteristicWriter,
) -> Result<(), RunError> {
    let button = ResetButton::new(options.address, options.name);
    button.press(writer).await?;
    Ok(())
}
