//! `swissinno-ble` library.
//!
//! Decodes the manufacturer-data advertisements of Swissinno BLE mouse traps
//! and keeps a per-trap reading fresh by combining pushed advertisements with
//! periodic passive and active scans.
//!
//! The binary (`src/main.rs`) is responsible for logging setup and process exit
//! codes. The core "business logic" lives in [`crate::coordinator`] and
//! [`crate::app`] where it can be tested deterministically with an injected
//! advertisement source and clock.

pub mod address;
pub mod app;
pub mod calibration;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod entity;
pub mod freshness;
pub mod output;
pub mod reading;
pub mod reset;
pub mod router;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use address::{DeviceAddress, ParseAddressError};
pub use calibration::{BatteryProfile, Calibration, percent_from_voltage, voltage_from_raw};
pub use config::{Config, DeviceConfig};
pub use coordinator::{TrapCoordinator, TrapSnapshot, UpdateError};
pub use decoder::decode;
pub use output::{OutputFormatter, TrapReport};
pub use reading::{PartialReading, TrapReading, TrapStatus};
pub use router::{PayloadSelection, Router};
pub use scanner::{Advertisement, AdvertisementSource, ScanError, ScanMode, WaitOutcome};
