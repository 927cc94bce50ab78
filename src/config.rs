//! Configuration file and command-line device definitions.
//!
//! A configuration file is TOML:
//!
//! ```toml
//! [calibration.rechargeable]
//! min_voltage = 2.0
//! max_voltage = 2.8
//!
//! [[devices]]
//! address = "AA:BB:CC:DD:EE:FF"
//! name = "Kitchen"
//! rechargeable = true
//! poll_interval_secs = 120
//! ```

use crate::address::DeviceAddress;
use crate::calibration::{BatteryProfile, Calibration};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name used when a device is configured without one.
pub const DEFAULT_DEVICE_NAME: &str = "Swissinno Mouse Trap";

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Polls closer together than this are refused.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default duration of the passive scan a poll starts with.
pub const DEFAULT_PASSIVE_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default duration of the active scan a poll falls back to.
pub const DEFAULT_ACTIVE_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no devices configured")]
    NoDevices,
    #[error("device {0} is configured more than once")]
    DuplicateDevice(DeviceAddress),
    #[error(
        "poll interval for {address} is {secs}s; the minimum is {}s",
        MIN_POLL_INTERVAL.as_secs()
    )]
    PollIntervalTooShort { address: DeviceAddress, secs: u64 },
    #[error("scan timeout for {0} must be greater than zero")]
    ZeroScanTimeout(DeviceAddress),
    #[error("{profile} battery profile needs min_voltage below max_voltage")]
    InvalidBatteryProfile { profile: &'static str },
}

/// One configured trap.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub address: DeviceAddress,
    #[serde(default = "default_name")]
    pub name: String,
    /// Use the rechargeable battery profile
    #[serde(default)]
    pub rechargeable: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_passive_scan_timeout_secs")]
    pub passive_scan_timeout_secs: u64,
    #[serde(default = "default_active_scan_timeout_secs")]
    pub active_scan_timeout_secs: u64,
}

fn default_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_passive_scan_timeout_secs() -> u64 {
    DEFAULT_PASSIVE_SCAN_TIMEOUT.as_secs()
}

fn default_active_scan_timeout_secs() -> u64 {
    DEFAULT_ACTIVE_SCAN_TIMEOUT.as_secs()
}

impl DeviceConfig {
    /// A device with default settings.
    pub fn new(address: DeviceAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            rechargeable: false,
            poll_interval_secs: default_poll_interval_secs(),
            passive_scan_timeout_secs: default_passive_scan_timeout_secs(),
            active_scan_timeout_secs: default_active_scan_timeout_secs(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn passive_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.passive_scan_timeout_secs)
    }

    pub fn active_scan_timeout(&self) -> Duration {
        Duration::from_secs(self.active_scan_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval() < MIN_POLL_INTERVAL {
            return Err(ConfigError::PollIntervalTooShort {
                address: self.address,
                secs: self.poll_interval_secs,
            });
        }
        if self.passive_scan_timeout_secs == 0 || self.active_scan_timeout_secs == 0 {
            return Err(ConfigError::ZeroScanTimeout(self.address));
        }
        Ok(())
    }
}

/// Complete listener configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Parse a configuration from TOML text without validating it.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Read a configuration file without validating it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Add a device, or update the existing entry with the same address.
    ///
    /// An existing entry takes the new name and becomes rechargeable if the new
    /// one is; its scan settings are kept.
    pub fn upsert_device(&mut self, device: DeviceConfig) {
        match self.devices.iter_mut().find(|d| d.address == device.address) {
            Some(existing) => {
                existing.name = device.name;
                existing.rechargeable |= device.rechargeable;
            }
            None => self.devices.push(device),
        }
    }

    pub fn profile_for(&self, device: &DeviceConfig) -> BatteryProfile {
        self.calibration.profile(device.rechargeable)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.calibration.disposable.is_valid() {
            return Err(ConfigError::InvalidBatteryProfile {
                profile: "disposable",
            });
        }
        if !self.calibration.rechargeable.is_valid() {
            return Err(ConfigError::InvalidBatteryProfile {
                profile: "rechargeable",
            });
        }
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.address) {
                return Err(ConfigError::DuplicateDevice(device.address));
            }
            device.validate()?;
        }
        Ok(())
    }
}

/// Parse a device from a string in the format "ADDRESS=NAME".
///
/// The name is optional: a bare address gets [`DEFAULT_DEVICE_NAME`].
///
/// # Example
/// ```
/// use swissinno_ble::config::parse_device;
///
/// let device = parse_device("aa:bb:cc:dd:ee:ff=Kitchen").unwrap();
/// assert_eq!(device.address.to_string(), "AA:BB:CC:DD:EE:FF");
/// assert_eq!(device.name, "Kitchen");
/// ```
pub fn parse_device(src: &str) -> Result<DeviceConfig, String> {
    let (address, name) = match src.split_once('=') {
        Some((address, name)) => (address, name.trim()),
        None => (src, ""),
    };
    let address: DeviceAddress = address
        .parse()
        .map_err(|err| format!("invalid device: {err}"))?;
    let name = if name.is_empty() {
        DEFAULT_DEVICE_NAME
    } else {
        name
    };
    Ok(DeviceConfig::new(address, name))
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use swissinno_ble::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit, millis_per_unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, "milliseconds", 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, "hours", 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, "minutes", 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, "seconds", 1_000)
    } else {
        (src, "duration", 1_000)
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    Ok(Duration::from_millis(value.saturating_mul(millis_per_unit)))
}
