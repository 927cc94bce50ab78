//! Entities exposed for each trap.
//!
//! A trap is presented as a handful of entities, each reading one field of the
//! coordinator's [`TrapReading`]. Consumers see them through two capabilities:
//! [`HasValue`] for the current state and [`HasAvailability`] for whether that
//! state can be trusted.

use crate::address::DeviceAddress;
use crate::freshness;
use crate::reading::TrapReading;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MANUFACTURER: &str = "Swissinno (unofficial)";
pub const MODEL: &str = "Mouse Trap";

/// The physical device the entities belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Lowercase address; stable across renames
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl DeviceInfo {
    pub fn new(address: DeviceAddress, name: impl Into<String>) -> Self {
        Self {
            identifier: address.to_lowercase_string(),
            name: name.into(),
            manufacturer: MANUFACTURER,
            model: MODEL,
        }
    }
}

/// State of a single entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntityValue {
    Binary(bool),
    Voltage(f64),
    Percent(u8),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// Entities that carry a value.
pub trait HasValue {
    /// Current value, or `None` when unknown.
    fn value(&self, reading: &TrapReading) -> Option<EntityValue>;
}

/// Entities that can become unavailable.
pub trait HasAvailability {
    fn available(&self, reading: &TrapReading, now: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Triggered flag
    Status,
    BatteryVoltage,
    Battery,
    LastUpdate,
    /// Last payload as hex; for diagnostics
    RawBeacon,
    Reset,
}

impl EntityKind {
    /// All kinds, in the order they are presented.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Status,
        EntityKind::BatteryVoltage,
        EntityKind::Battery,
        EntityKind::LastUpdate,
        EntityKind::RawBeacon,
        EntityKind::Reset,
    ];

    pub fn name_suffix(self) -> &'static str {
        match self {
            EntityKind::Status => "Status",
            EntityKind::BatteryVoltage => "Battery Voltage",
            EntityKind::Battery => "Battery",
            EntityKind::LastUpdate => "Last Update",
            EntityKind::RawBeacon => "Raw Beacon",
            EntityKind::Reset => "Reset",
        }
    }

    pub fn unique_suffix(self) -> &'static str {
        match self {
            EntityKind::Status => "status",
            EntityKind::BatteryVoltage => "voltage",
            EntityKind::Battery => "battery",
            EntityKind::LastUpdate => "last_update",
            EntityKind::RawBeacon => "raw_beacon",
            EntityKind::Reset => "reset_button",
        }
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            EntityKind::BatteryVoltage => Some("V"),
            EntityKind::Battery => Some("%"),
            _ => None,
        }
    }

    pub fn enabled_by_default(self) -> bool {
        self != EntityKind::RawBeacon
    }
}

/// One entity of a trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapEntity {
    pub kind: EntityKind,
    pub unique_id: String,
    pub name: String,
    pub device: DeviceInfo,
}

impl TrapEntity {
    pub fn new(kind: EntityKind, device: &DeviceInfo) -> Self {
        Self {
            kind,
            unique_id: format!("{}_{}", device.identifier, kind.unique_suffix()),
            name: format!("{} {}", device.name, kind.name_suffix()),
            device: device.clone(),
        }
    }

    pub fn enabled_by_default(&self) -> bool {
        self.kind.enabled_by_default()
    }
}

impl HasValue for TrapEntity {
    fn value(&self, reading: &TrapReading) -> Option<EntityValue> {
        match self.kind {
            EntityKind::Status => reading.triggered.map(EntityValue::Binary),
            EntityKind::BatteryVoltage => reading.voltage.map(EntityValue::Voltage),
            EntityKind::Battery => reading.battery_percent.map(EntityValue::Percent),
            EntityKind::LastUpdate => reading.last_update.map(EntityValue::Timestamp),
            EntityKind::RawBeacon => reading.raw_hex.clone().map(EntityValue::Text),
            EntityKind::Reset => None,
        }
    }
}

/// Sensors go stale with the reading. The reset button stays usable however
/// long the trap has been silent; a running reset is tracked by the
/// [`ResetButton`](crate::reset::ResetButton) itself.
impl HasAvailability for TrapEntity {
    fn available(&self, reading: &TrapReading, now: DateTime<Utc>) -> bool {
        match self.kind {
            EntityKind::Reset => true,
            _ => freshness::is_available(reading.last_update, now),
        }
    }
}

/// All entities for one trap.
pub fn entities(device: &DeviceInfo) -> Vec<TrapEntity> {
    EntityKind::ALL
        .iter()
        .map(|&kind| TrapEntity::new(kind, device))
        .collect()
}
