use crate::address::DeviceAddress;
use crate::freshness::Clock;
use crate::scanner::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, AdvertisementPredicate, AdvertisementSource,
    ScanError, ScanMode, Subscription, WaitOutcome,
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A stable device address for unit tests.
pub const TEST_ADDRESS: DeviceAddress = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build a 9-byte trap payload with the given status byte and battery code.
pub fn payload(status: u8, raw_battery: u16) -> Vec<u8> {
    let [lo, hi] = raw_battery.to_le_bytes();
    vec![status, 0, 0, 0, 0, 0, 0, lo, hi]
}

/// Build an advertisement carrying `payload` under the primary Swissinno ID.
pub fn advertisement(
    address: DeviceAddress,
    payload: &[u8],
    timestamp: Option<DateTime<Utc>>,
) -> Advertisement {
    Advertisement {
        address,
        manufacturer_data: BTreeMap::from([(0xBB0B, payload.to_vec())]),
        timestamp,
        connectable: true,
    }
}

/// A UTC instant `secs` seconds after the epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// An `AdvertisementSource` with a scripted cache and scripted scan results.
///
/// Waits without a scripted result sleep for their full timeout and then time
/// out, so tests that hit them should run with paused time.
#[derive(Debug, Default)]
pub struct FakeSource {
    cached: Mutex<Option<Advertisement>>,
    waits: Mutex<VecDeque<Result<WaitOutcome, ScanError>>>,
    wait_calls: Mutex<Vec<(ScanMode, Duration)>>,
    push: Mutex<Option<mpsc::Sender<Advertisement>>>,
    subscribe_calls: Mutex<Vec<ScanMode>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cached(&self, advertisement: Advertisement) {
        *self.cached.lock().unwrap() = Some(advertisement);
    }

    pub fn script_wait(&self, result: Result<WaitOutcome, ScanError>) {
        self.waits.lock().unwrap().push_back(result);
    }

    pub fn wait_calls(&self) -> Vec<(ScanMode, Duration)> {
        self.wait_calls.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> Vec<ScanMode> {
        self.subscribe_calls.lock().unwrap().clone()
    }

    /// Deliver an advertisement to the current subscriber.
    ///
    /// Returns `false` when nobody is subscribed.
    pub fn push(&self, advertisement: Advertisement) -> bool {
        match self.push.lock().unwrap().as_ref() {
            Some(tx) => tx.try_send(advertisement).is_ok(),
            None => false,
        }
    }

    pub fn has_subscriber(&self) -> bool {
        self.push
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl AdvertisementSource for FakeSource {
    fn subscribe(
        &self,
        _address: DeviceAddress,
        mode: ScanMode,
    ) -> BoxFuture<'_, Result<Subscription, ScanError>> {
        Box::pin(async move {
            self.subscribe_calls.lock().unwrap().push(mode);
            let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
            *self.push.lock().unwrap() = Some(tx);
            Ok(Subscription::new(rx, None))
        })
    }

    fn last_advertisement(&self, address: DeviceAddress) -> BoxFuture<'_, Option<Advertisement>> {
        Box::pin(async move {
            self.cached
                .lock()
                .unwrap()
                .clone()
                .filter(|adv| adv.address == address)
        })
    }

    fn wait_for_advertisement<'a>(
        &'a self,
        _address: DeviceAddress,
        predicate: AdvertisementPredicate<'a>,
        mode: ScanMode,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<WaitOutcome, ScanError>> {
        Box::pin(async move {
            self.wait_calls.lock().unwrap().push((mode, timeout));
            let scripted = self.waits.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(WaitOutcome::Hit(adv))) if predicate(&adv) => Ok(WaitOutcome::Hit(adv)),
                Some(Err(err)) => Err(err),
                _ => {
                    tokio::time::sleep(timeout).await;
                    Ok(WaitOutcome::Timeout)
                }
            }
        })
    }
}
