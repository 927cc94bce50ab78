//! Trap reading data structures.

use crate::calibration::{BatteryProfile, voltage_from_raw};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Trap state reported by the status byte of an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapStatus {
    /// Status byte `0x00`: armed, not triggered
    Idle,
    /// Status byte `0x01`: the trap has snapped
    Triggered,
    /// Any other status byte. Surfaced for diagnostics, never treated as idle.
    Unknown(u8),
}

impl TrapStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => TrapStatus::Idle,
            0x01 => TrapStatus::Triggered,
            other => TrapStatus::Unknown(other),
        }
    }

    /// Tri-state trigger flag: `None` when the status byte is not recognized.
    pub fn triggered(self) -> Option<bool> {
        match self {
            TrapStatus::Idle => Some(false),
            TrapStatus::Triggered => Some(true),
            TrapStatus::Unknown(_) => None,
        }
    }
}

/// Fields decoded from one advertisement payload.
///
/// Every field degrades independently: a short payload still yields whatever
/// could be read from it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialReading {
    /// `None` when the payload was empty
    pub status: Option<TrapStatus>,
    /// `None` when the payload is shorter than 9 bytes
    pub raw_battery_code: Option<u16>,
    /// Whole payload as uppercase hex
    pub raw_hex: String,
}

/// Current state of a trap, accumulated across advertisements.
///
/// The coordinator owns one reading per device and mutates it in place, so a
/// field that a later payload does not carry keeps its previous value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TrapReading {
    /// `Some(true)` when triggered, `None` when unknown
    pub triggered: Option<bool>,
    /// Little-endian battery code from payload bytes 7..9
    pub raw_battery_code: Option<u16>,
    /// Battery voltage in Volts
    pub voltage: Option<f64>,
    /// Battery level in percent (0-100)
    pub battery_percent: Option<u8>,
    /// Last payload as uppercase hex
    pub raw_hex: Option<String>,
    /// When a timestamped advertisement was last processed
    pub last_update: Option<DateTime<Utc>>,
}

impl TrapReading {
    /// Fold a decoded payload into this reading.
    ///
    /// An absent status leaves `triggered` untouched; an unknown status sets it
    /// to `None`. Battery fields change only when the payload carried a code.
    pub fn apply(&mut self, partial: &PartialReading, profile: BatteryProfile) {
        self.raw_hex = Some(partial.raw_hex.clone());

        if let Some(status) = partial.status {
            self.triggered = status.triggered();
        }

        if let Some(raw) = partial.raw_battery_code {
            let voltage = voltage_from_raw(raw);
            self.raw_battery_code = Some(raw);
            self.voltage = Some(voltage);
            self.battery_percent = Some(profile.percent(voltage));
        }
    }
}
