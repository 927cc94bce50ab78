//! Staleness tracking.
//!
//! All timestamps are wall-clock UTC. The same [`Clock`] stamps
//! `last_update` and answers availability queries, so the two can never drift
//! onto different time bases.

use chrono::{DateTime, TimeDelta, Utc};

/// A trap that has not been heard from for this long is unavailable.
pub const UNAVAILABLE_AFTER: TimeDelta = TimeDelta::seconds(600);

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Lifecycle of a device as seen by its coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePhase {
    /// Nothing decoded yet
    Initial,
    /// Fresh data
    HasData,
    /// Data older than [`UNAVAILABLE_AFTER`]
    Stale,
}

/// Whether a device last updated at `last_update` is still available at `now`.
///
/// Elapsed time must be strictly below [`UNAVAILABLE_AFTER`]: at exactly 600 s
/// the device is unavailable. A `last_update` in the future (clock stepped
/// backwards) counts as fresh.
pub fn is_available(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_update {
        Some(last) => now - last < UNAVAILABLE_AFTER,
        None => false,
    }
}

pub fn phase(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DevicePhase {
    match last_update {
        None => DevicePhase::Initial,
        Some(_) if is_available(last_update, now) => DevicePhase::HasData,
        Some(_) => DevicePhase::Stale,
    }
}
