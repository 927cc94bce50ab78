//! Battery calibration for Swissinno traps.
//!
//! The trap reports its battery as an ADC-like code. The conversion constants
//! below were derived empirically against a bench supply; they are device
//! calibration and must not be simplified.

use serde::Deserialize;

/// Raw code reported at 0 V.
pub const RAW_ZERO_OFFSET: f64 = 253.0;

/// Raw code increments per volt.
pub const RAW_COUNTS_PER_VOLT: f64 = 72.0;

/// Voltage window used to map a cell voltage onto 0-100 %.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BatteryProfile {
    /// Voltage reported as 0 %
    pub min_voltage: f64,
    /// Voltage reported as 100 %
    pub max_voltage: f64,
}

impl BatteryProfile {
    /// Two alkaline AA cells.
    pub const DISPOSABLE: BatteryProfile = BatteryProfile {
        min_voltage: 2.0,
        max_voltage: 3.2,
    };

    /// Two NiMH AA cells.
    pub const RECHARGEABLE: BatteryProfile = BatteryProfile {
        min_voltage: 2.0,
        max_voltage: 2.8,
    };

    pub fn is_valid(&self) -> bool {
        self.min_voltage.is_finite()
            && self.max_voltage.is_finite()
            && self.min_voltage < self.max_voltage
    }

    /// Battery percentage for `voltage` within this profile.
    pub fn percent(&self, voltage: f64) -> u8 {
        percent_from_voltage(voltage, self.min_voltage, self.max_voltage)
    }
}

/// The pair of profiles a device chooses from with its `rechargeable` flag.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub disposable: BatteryProfile,
    pub rechargeable: BatteryProfile,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            disposable: BatteryProfile::DISPOSABLE,
            rechargeable: BatteryProfile::RECHARGEABLE,
        }
    }
}

impl Calibration {
    pub fn profile(&self, rechargeable: bool) -> BatteryProfile {
        if rechargeable {
            self.rechargeable
        } else {
            self.disposable
        }
    }
}

/// Convert a raw battery code into volts, rounded to two decimals.
///
/// Codes below the zero offset produce negative voltages; the percentage
/// conversion clamps those to 0 %.
pub fn voltage_from_raw(raw: u16) -> f64 {
    let volts = (f64::from(raw) - RAW_ZERO_OFFSET) / RAW_COUNTS_PER_VOLT;
    (volts * 100.0).round_ties_even() / 100.0
}

/// Map a voltage onto a 0-100 battery percentage.
///
/// The result is always clamped, even for voltages outside the window. A
/// degenerate window (`max_v <= min_v`) reports 100 at or above `max_v` and 0
/// below it.
pub fn percent_from_voltage(voltage: f64, min_v: f64, max_v: f64) -> u8 {
    if max_v <= min_v {
        return if voltage >= max_v { 100 } else { 0 };
    }

    let percent = ((voltage - min_v) / (max_v - min_v) * 100.0).round_ties_even();
    if percent.is_nan() {
        return 0;
    }
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_from_raw_reference_points() {
        assert_eq!(voltage_from_raw(253), 0.0);
        assert_eq!(voltage_from_raw(325), 1.0);
        assert_eq!(voltage_from_raw(469), 3.0);
    }

    #[test]
    fn test_voltage_from_raw_rounds_to_two_decimals() {
        // (400 - 253) / 72 = 2.041666...
        assert_eq!(voltage_from_raw(400), 2.04);
        // (460 - 253) / 72 = 2.875
        assert_eq!(voltage_from_raw(460), 2.88);
    }

    #[test]
    fn test_voltage_from_raw_below_offset_is_negative() {
        assert!(voltage_from_raw(0) < 0.0);
    }

    #[test]
    fn test_percent_at_bounds() {
        assert_eq!(percent_from_voltage(2.0, 2.0, 3.2), 0);
        assert_eq!(percent_from_voltage(3.2, 2.0, 3.2), 100);
        assert_eq!(percent_from_voltage(2.6, 2.0, 3.2), 50);
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(percent_from_voltage(1.0, 2.0, 3.2), 0);
        assert_eq!(percent_from_voltage(4.0, 2.0, 3.2), 100);
        assert_eq!(percent_from_voltage(-7.5, 2.0, 3.2), 0);
    }

    #[test]
    fn test_percent_degenerate_window() {
        assert_eq!(percent_from_voltage(3.0, 3.0, 3.0), 100);
        assert_eq!(percent_from_voltage(2.9, 3.0, 3.0), 0);
        assert_eq!(percent_from_voltage(2.9, 3.0, 2.0), 100);
    }

    #[test]
    fn test_percent_nan_voltage() {
        assert_eq!(percent_from_voltage(f64::NAN, 2.0, 3.2), 0);
    }

    #[test]
    fn test_profile_selection() {
        let calibration = Calibration::default();
        assert_eq!(calibration.profile(false), BatteryProfile::DISPOSABLE);
        assert_eq!(calibration.profile(true), BatteryProfile::RECHARGEABLE);
        assert_eq!(calibration.profile(true).percent(2.8), 100);
        assert_eq!(calibration.profile(false).percent(2.8), 67);
    }

    #[test]
    fn test_profile_validity() {
        assert!(BatteryProfile::DISPOSABLE.is_valid());
        let inverted = BatteryProfile {
            min_voltage: 3.0,
            max_voltage: 2.0,
        };
        assert!(!inverted.is_valid());
    }
}
