//! InfluxDB line protocol output formatter.

use crate::output::{OutputFormatter, TrapReport};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::String(s) => {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\"")
            }
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Escape commas, equals signs and spaces in a tag value.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Out of range for i64 nanoseconds after 2262; such points go unstamped.
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.timestamp_nanos_opt())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Each report becomes one point tagged with the trap's address and name. The
/// point is stamped with the time of the report.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, report: &TrapReport) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("mac".to_string(), report.address.to_string());
        tags.insert("name".to_string(), report.name.clone());
        tags
    }

    /// Build the field set. Unknown values are omitted.
    fn field_set(&self, report: &TrapReport) -> BTreeMap<String, FieldValue> {
        let r = &report.reading;
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, $variant:ident, $val:expr) => {
                if let Some(v) = $val {
                    fields.insert($name.into(), FieldValue::$variant(v));
                }
            };
        }

        add!("triggered", Boolean, r.triggered);
        add!("battery_potential", Float, r.voltage);
        add!("battery_percent", Integer, r.battery_percent.map(i64::from));
        add!("battery_raw", Integer, r.raw_battery_code.map(i64::from));
        add!(
            "seconds_since_update",
            Integer,
            r.last_update
                .map(|t| (report.reported_at - t).num_seconds().max(0))
        );
        fields.insert("available".into(), FieldValue::Boolean(report.available));

        fields
    }

    fn to_data_point(&self, report: &TrapReport) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(report),
            field_set: self.field_set(report),
            timestamp: Some(report.reported_at),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, report: &TrapReport) -> String {
        format!("{}", self.to_data_point(report))
    }
}
