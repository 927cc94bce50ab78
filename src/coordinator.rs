//! Per-device update coordinator.
//!
//! A coordinator keeps one [`TrapReading`] current from two directions:
//! advertisements pushed by the BLE subsystem as they arrive, and a periodic
//! poll that escalates from the subsystem's cache to a passive scan and then an
//! active scan. Both paths run through the same decode step and share the
//! dedup key, so an advertisement is only ever applied once.

use crate::address::DeviceAddress;
use crate::calibration::BatteryProfile;
use crate::config::DeviceConfig;
use crate::decoder;
use crate::freshness::{self, Clock, DevicePhase};
use crate::reading::TrapReading;
use crate::router::{PayloadSelection, Router};
use crate::scanner::{
    Advertisement, AdvertisementSource, ScanError, ScanMode, Subscription, WaitOutcome,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Hard failures of a poll. Only raised while the device has never been seen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("no advertisement received from {address}")]
    NoAdvertisement { address: DeviceAddress },
    #[error("advertisement from {address} lacked manufacturer data")]
    NoPayload { address: DeviceAddress },
}

/// Mutable state owned by one coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorState {
    pub reading: TrapReading,
    /// Timestamp of the last processed advertisement
    pub last_service_info_time: Option<DateTime<Utc>>,
    /// Set once the "no advertisement" condition has been logged
    pub missing_logged: bool,
}

/// What observers of a coordinator see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrapSnapshot {
    pub reading: TrapReading,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Applied,
    Duplicate,
    ForeignDevice,
    NoPayload,
}

/// How a bounded wait inside a poll ended.
#[derive(Debug)]
enum Scan {
    Hit(Advertisement),
    /// A pushed advertisement was applied while waiting
    Pushed,
    Timeout,
}

/// Whether an advertisement stamped `timestamp` comes after the last one
/// processed. Unstamped advertisements always count as new.
fn is_newer(timestamp: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>) -> bool {
    match (timestamp, last) {
        (Some(timestamp), Some(last)) => timestamp > last,
        _ => true,
    }
}

pub struct TrapCoordinator {
    device: DeviceConfig,
    profile: BatteryProfile,
    router: Router,
    source: Arc<dyn AdvertisementSource>,
    clock: Arc<dyn Clock>,
    state: CoordinatorState,
    updates: watch::Sender<TrapSnapshot>,
    subscription: Option<Subscription>,
}

impl TrapCoordinator {
    pub fn new(
        device: DeviceConfig,
        profile: BatteryProfile,
        source: Arc<dyn AdvertisementSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (updates, _) = watch::channel(TrapSnapshot::default());
        Self {
            router: Router::new(device.address),
            device,
            profile,
            source,
            clock,
            state: CoordinatorState::default(),
            updates,
            subscription: None,
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub fn address(&self) -> DeviceAddress {
        self.router.address()
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn reading(&self) -> &TrapReading {
        &self.state.reading
    }

    pub fn available(&self) -> bool {
        freshness::is_available(self.state.reading.last_update, self.clock.now())
    }

    pub fn phase(&self) -> DevicePhase {
        freshness::phase(self.state.reading.last_update, self.clock.now())
    }

    /// Receiver that sees every change of the reading or its availability.
    pub fn subscribe_updates(&self) -> watch::Receiver<TrapSnapshot> {
        self.updates.subscribe()
    }

    /// Subscribe to pushed advertisements. Does nothing if already subscribed.
    pub async fn start(&mut self) -> Result<(), ScanError> {
        if self.subscription.is_none() {
            let subscription = self
                .source
                .subscribe(self.address(), ScanMode::Passive)
                .await?;
            self.subscription = Some(subscription);
            tracing::debug!(address = %self.address(), "subscribed to advertisements");
        }
        Ok(())
    }

    /// Handle a pushed advertisement. Returns whether the reading changed.
    pub fn on_push(&mut self, advertisement: &Advertisement) -> bool {
        match self.process(advertisement) {
            Processed::Applied => true,
            Processed::NoPayload => {
                tracing::debug!(
                    address = %self.address(),
                    "advertisement ignored: no manufacturer data"
                );
                false
            }
            Processed::Duplicate | Processed::ForeignDevice => false,
        }
    }

    /// Refresh the reading on a poll tick.
    ///
    /// Uses the subsystem's cached advertisement when it is newer than the last
    /// one processed. Otherwise waits for a passive advertisement and then for
    /// an active one. Pushed advertisements keep being applied during the waits
    /// and end the poll early. When both waits come up empty the previous
    /// reading is returned unchanged, unless the device has never been seen,
    /// which is the only case that fails.
    ///
    /// Availability is re-evaluated afterwards, so observers learn when a
    /// silent trap goes stale.
    pub async fn on_poll_tick(&mut self) -> Result<&TrapReading, UpdateError> {
        let result = self.poll().await;
        self.publish();
        result.map(|()| &self.state.reading)
    }

    async fn poll(&mut self) -> Result<(), UpdateError> {
        let address = self.address();

        if let Some(cached) = self.source.last_advertisement(address).await
            && cached.timestamp.is_some()
            && is_newer(cached.timestamp, self.state.last_service_info_time)
        {
            if self.process(&cached) == Processed::NoPayload {
                tracing::debug!(%address, "cached advertisement lacked manufacturer data");
            }
            return Ok(());
        }

        let mut scan = self
            .wait(ScanMode::Passive, self.device.passive_scan_timeout())
            .await;
        if matches!(scan, Scan::Timeout) {
            tracing::debug!(
                %address,
                timeout = ?self.device.passive_scan_timeout(),
                last_update = ?self.state.reading.last_update,
                "passive scan timed out; retrying with active scan"
            );
            scan = self
                .wait(ScanMode::Active, self.device.active_scan_timeout())
                .await;
        }

        let advertisement = match scan {
            Scan::Hit(advertisement) => advertisement,
            Scan::Pushed => return Ok(()),
            Scan::Timeout => {
                let Some(last_update) = self.state.reading.last_update else {
                    return Err(UpdateError::NoAdvertisement { address });
                };
                if !self.state.missing_logged {
                    tracing::info!(
                        %address,
                        since = %last_update.to_rfc3339(),
                        "no advertisement received"
                    );
                    self.state.missing_logged = true;
                }
                return Ok(());
            }
        };

        if self.process(&advertisement) == Processed::NoPayload {
            tracing::debug!(%address, "advertisement lacked manufacturer data");
            if self.state.reading.last_update.is_none() {
                return Err(UpdateError::NoPayload { address });
            }
        }
        Ok(())
    }

    /// Stop receiving pushed advertisements. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
            tracing::debug!(address = %self.address(), "unsubscribed from advertisements");
        }
    }

    /// Drive the coordinator until `cancel` fires.
    ///
    /// Pushed advertisements and poll ticks are handled on this one task. A
    /// poll in progress is abandoned as soon as cancellation is requested.
    pub async fn run(mut self, cancel: CancellationToken) {
        let address = self.address();
        if let Err(error) = self.start().await {
            tracing::warn!(
                %address,
                %error,
                "cannot subscribe to advertisements; relying on polling"
            );
        }

        let mut interval = tokio::time::interval(self.device.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                pushed = next_push(&mut self.subscription) => match pushed {
                    Some(advertisement) => {
                        self.on_push(&advertisement);
                    }
                    None => {
                        tracing::debug!(%address, "advertisement stream ended");
                        self.subscription = None;
                    }
                },
                _ = interval.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.on_poll_tick() => {
                            if let Err(error) = result {
                                tracing::warn!(%address, %error, "update failed");
                            }
                        }
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Wait for a fresh advertisement, applying pushes in the meantime.
    ///
    /// Advertisements not newer than the last processed one do not count as a
    /// hit; the backend may hand out data it cached long ago.
    async fn wait(&mut self, mode: ScanMode, timeout: Duration) -> Scan {
        let address = self.address();
        let last = self.state.last_service_info_time;
        let predicate = move |adv: &Advertisement| {
            adv.address == address && adv.has_manufacturer_data() && is_newer(adv.timestamp, last)
        };
        let source = Arc::clone(&self.source);
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let scan = source.wait_for_advertisement(address, &predicate, mode, remaining);
            tokio::select! {
                result = scan => {
                    return match result {
                        Ok(WaitOutcome::Hit(advertisement)) => Scan::Hit(advertisement),
                        Ok(WaitOutcome::Timeout) => Scan::Timeout,
                        Err(error) => {
                            tracing::debug!(%address, %mode, %error, "scan failed");
                            Scan::Timeout
                        }
                    };
                }
                pushed = next_push(&mut self.subscription) => match pushed {
                    Some(advertisement) => {
                        if self.on_push(&advertisement) {
                            return Scan::Pushed;
                        }
                    }
                    None => {
                        tracing::debug!(%address, "advertisement stream ended");
                        self.subscription = None;
                    }
                },
            }

            if Instant::now() >= deadline {
                return Scan::Timeout;
            }
        }
    }

    /// Tell observers about the current reading and availability, if either
    /// changed since the last time.
    fn publish(&self) {
        let snapshot = TrapSnapshot {
            reading: self.state.reading.clone(),
            available: self.available(),
        };
        self.updates.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn process(&mut self, advertisement: &Advertisement) -> Processed {
        if !is_newer(advertisement.timestamp, self.state.last_service_info_time) {
            return Processed::Duplicate;
        }

        let payload = match self.router.select(advertisement) {
            PayloadSelection::ForeignDevice => return Processed::ForeignDevice,
            selection => match selection.payload() {
                Some(payload) => payload,
                None => return Processed::NoPayload,
            },
        };

        let partial = decoder::decode(payload);
        tracing::debug!(address = %self.address(), raw = %partial.raw_hex, "manufacturer data");
        self.state.reading.apply(&partial, self.profile);

        if let Some(timestamp) = advertisement.timestamp {
            self.state.reading.last_update = Some(self.clock.now());
            self.state.last_service_info_time = Some(timestamp);
            self.state.missing_logged = false;
        }

        let reading = &self.state.reading;
        tracing::debug!(
            address = %self.address(),
            triggered = ?reading.triggered,
            voltage = ?reading.voltage,
            battery = ?reading.battery_percent,
            last_update = ?reading.last_update,
            "processed advertisement"
        );
        self.publish();
        Processed::Applied
    }
}

async fn next_push(subscription: &mut Option<Subscription>) -> Option<Advertisement> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

impl Drop for TrapCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
