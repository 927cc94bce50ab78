//! Output formatters for trap readings.
//!
//! This module provides a trait for formatting trap reports and
//! implementations for InfluxDB line protocol and JSON.

pub mod influxdb;
pub mod json;

use crate::address::DeviceAddress;
use crate::entity::{self, DeviceInfo, EntityValue, HasAvailability, HasValue};
use crate::reading::TrapReading;
use chrono::{DateTime, Utc};
use clap::ValueEnum;

/// A reading of one trap at one point in time, ready for output.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapReport {
    pub address: DeviceAddress,
    pub name: String,
    pub reading: TrapReading,
    pub available: bool,
    pub reported_at: DateTime<Utc>,
}

/// Current state of one entity in a report.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EntityState {
    pub unique_id: String,
    pub name: String,
    pub value: Option<EntityValue>,
    pub unit: Option<&'static str>,
    pub available: bool,
}

impl TrapReport {
    pub fn device(&self) -> DeviceInfo {
        DeviceInfo::new(self.address, self.name.clone())
    }

    /// States of the entities enabled by default.
    pub fn entity_states(&self) -> Vec<EntityState> {
        entity::entities(&self.device())
            .into_iter()
            .filter(|e| e.enabled_by_default())
            .map(|e| EntityState {
                value: e.value(&self.reading),
                unit: e.kind.unit(),
                available: e.available(&self.reading, self.reported_at),
                unique_id: e.unique_id,
                name: e.name,
            })
            .collect()
    }
}

/// Trait for formatting trap reports into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a report as a single line, without the trailing newline.
    fn format(&self, report: &TrapReport) -> String;
}

/// Output format selectable on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// InfluxDB line protocol
    #[default]
    Influxdb,
    /// One JSON object per line
    Json,
}

/// Build the formatter for `format`.
pub fn formatter(format: OutputFormat, influxdb_measurement: &str) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Influxdb => Box::new(influxdb::InfluxDbFormatter::new(
            influxdb_measurement.to_string(),
        )),
        OutputFormat::Json => Box::new(json::JsonFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, at};

    #[test]
    fn test_entity_states_skip_raw_beacon() {
        let report = TrapReport {
            address: TEST_ADDRESS,
            name: "Kitchen".to_string(),
            reading: TrapReading {
                triggered: Some(true),
                raw_hex: Some("01".to_string()),
                last_update: Some(at(10)),
                ..Default::default()
            },
            available: true,
            reported_at: at(20),
        };

        let states = report.entity_states();
        assert_eq!(states.len(), 5);
        assert!(states.iter().all(|s| !s.unique_id.ends_with("_raw_beacon")));
        assert_eq!(states[0].value, Some(EntityValue::Binary(true)));
        assert!(states[0].available);
        assert_eq!(states[1].unit, Some("V"));
        assert_eq!(states[1].value, None);

        let reset = &states[4];
        assert_eq!(reset.unique_id, "aa:bb:cc:dd:ee:ff_reset_button");
        assert_eq!(reset.value, None);
        assert!(reset.available);
    }
}
