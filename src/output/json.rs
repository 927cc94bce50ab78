//! JSON output formatter.

use crate::output::{EntityState, OutputFormatter, TrapReport};
use crate::reading::TrapReading;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Formats each report as one JSON object.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

#[derive(Serialize)]
struct JsonReport<'a> {
    address: String,
    name: &'a str,
    available: bool,
    reported_at: DateTime<Utc>,
    reading: &'a TrapReading,
    entities: Vec<EntityState>,
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, report: &TrapReport) -> String {
        let json = JsonReport {
            address: report.address.to_string(),
            name: &report.name,
            available: report.available,
            reported_at: report.reported_at,
            reading: &report.reading,
            entities: report.entity_states(),
        };
        // Serializing plain structs with string keys cannot fail.
        serde_json::to_string(&json).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, at};
    use serde_json::Value;

    #[test]
    fn test_json_report() {
        let report = TrapReport {
            address: TEST_ADDRESS,
            name: "Kitchen".to_string(),
            reading: TrapReading {
                triggered: Some(false),
                raw_battery_code: Some(469),
                voltage: Some(3.0),
                battery_percent: Some(83),
                raw_hex: Some("00000000000000D501".to_string()),
                last_update: Some(at(60)),
            },
            available: true,
            reported_at: at(120),
        };

        let line = JsonFormatter.format(&report);
        assert!(!line.contains('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["address"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(value["available"], true);
        assert_eq!(value["reported_at"], "1970-01-01T00:02:00Z");
        assert_eq!(value["reading"]["triggered"], false);
        assert_eq!(value["reading"]["battery_percent"], 83);
        assert_eq!(value["reading"]["raw_hex"], "00000000000000D501");
        assert_eq!(value["entities"][0]["unique_id"], "aa:bb:cc:dd:ee:ff_status");
        assert_eq!(value["entities"][1]["value"]["value"], 3.0);
        assert_eq!(value["entities"][2]["unit"], "%");
    }

    #[test]
    fn test_unknown_values_are_null() {
        let report = TrapReport {
            address: TEST_ADDRESS,
            name: "Kitchen".to_string(),
            reading: TrapReading::default(),
            available: false,
            reported_at: at(0),
        };

        let value: Value = serde_json::from_str(&JsonFormatter.format(&report)).unwrap();
        assert_eq!(value["reading"]["triggered"], Value::Null);
        assert_eq!(value["entities"][0]["value"], Value::Null);
        assert_eq!(value["entities"][0]["available"], false);
    }
}
