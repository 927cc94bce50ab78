//! Host BLE subsystem abstraction.
//!
//! Coordinators never drive the radio themselves. They subscribe to pushed
//! advertisements, peek at the backend's advertisement cache and issue bounded
//! scan requests through [`AdvertisementSource`], which a backend (BlueZ via
//! `bluer`, or a fake in tests) implements.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::address::DeviceAddress;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for pushed advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// One advertisement as observed by the host BLE subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: DeviceAddress,
    /// Manufacturer-specific data keyed by company ID, company ID bytes stripped
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// When the backend observed the advertisement; doubles as its identity
    pub timestamp: Option<DateTime<Utc>>,
    pub connectable: bool,
}

impl Advertisement {
    pub fn has_manufacturer_data(&self) -> bool {
        !self.manufacturer_data.is_empty()
    }
}

/// Scanning mode requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// Listen only
    Passive,
    /// Also request scan responses; costs more power
    Active,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Passive => write!(f, "passive"),
            ScanMode::Active => write!(f, "active"),
        }
    }
}

/// Result of a bounded wait for an advertisement.
///
/// A timeout is an ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Hit(Advertisement),
    Timeout,
}

/// Predicate applied to advertisements during a bounded wait.
pub type AdvertisementPredicate<'a> = &'a (dyn Fn(&Advertisement) -> bool + Send + Sync);

/// A live stream of pushed advertisements.
///
/// Dropping the subscription, or calling [`Subscription::unsubscribe`],
/// stops the backend task feeding it.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Advertisement>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Advertisement>, task: Option<JoinHandle<()>>) -> Self {
        Self { receiver, task }
    }

    /// Next pushed advertisement, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Advertisement> {
        self.receiver.recv().await
    }

    /// Stop receiving. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.receiver.close();
    }

    /// Wait for the first advertisement accepted by `predicate`.
    ///
    /// Returns `None` if the stream ends first.
    pub async fn first_matching(
        &mut self,
        predicate: AdvertisementPredicate<'_>,
    ) -> Option<Advertisement> {
        while let Some(advertisement) = self.recv().await {
            if predicate(&advertisement) {
                return Some(advertisement);
            }
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The host BLE subsystem as seen by a coordinator.
pub trait AdvertisementSource: Send + Sync {
    /// Stream advertisements from `address` as they arrive.
    fn subscribe(
        &self,
        address: DeviceAddress,
        mode: ScanMode,
    ) -> BoxFuture<'_, Result<Subscription, ScanError>>;

    /// Most recent advertisement from `address` in the backend's cache,
    /// without waiting.
    fn last_advertisement(&self, address: DeviceAddress) -> BoxFuture<'_, Option<Advertisement>>;

    /// Wait up to `timeout` for an advertisement from `address` accepted by
    /// `predicate`.
    fn wait_for_advertisement<'a>(
        &'a self,
        address: DeviceAddress,
        predicate: AdvertisementPredicate<'a>,
        mode: ScanMode,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<WaitOutcome, ScanError>>;
}

/// Wait for a matching advertisement on a fresh subscription.
///
/// Backends whose scans are plain subscriptions can implement
/// [`AdvertisementSource::wait_for_advertisement`] with this.
pub async fn wait_on_subscription(
    source: &(impl AdvertisementSource + ?Sized),
    address: DeviceAddress,
    predicate: AdvertisementPredicate<'_>,
    mode: ScanMode,
    timeout: Duration,
) -> Result<WaitOutcome, ScanError> {
    let mut subscription = source.subscribe(address, mode).await?;
    let outcome = tokio::time::timeout(timeout, subscription.first_matching(predicate)).await;
    subscription.unsubscribe();

    Ok(match outcome {
        Ok(Some(advertisement)) => WaitOutcome::Hit(advertisement),
        Ok(None) | Err(_) => WaitOutcome::Timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_ADDRESS, advertisement, at};

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter off".to_string());
        assert_eq!(err.to_string(), "Bluetooth error: adapter off");

        let err = ScanError::BackendNotAvailable("bluer".to_string());
        assert_eq!(
            err.to_string(),
            "Backend 'bluer' not available (not compiled in)"
        );
    }

    #[test]
    fn test_scan_mode_display() {
        assert_eq!(ScanMode::Passive.to_string(), "passive");
        assert_eq!(ScanMode::Active.to_string(), "active");
    }

    #[tokio::test]
    async fn test_subscription_first_matching_skips_rejected() {
        let (tx, rx) = mpsc::channel(4);
        let mut subscription = Subscription::new(rx, None);

        let empty = Advertisement {
            manufacturer_data: BTreeMap::new(),
            ..advertisement(TEST_ADDRESS, &[], Some(at(1)))
        };
        let wanted = advertisement(TEST_ADDRESS, &[0x01], Some(at(2)));
        tx.send(empty).await.unwrap();
        tx.send(wanted.clone()).await.unwrap();

        let found = subscription
            .first_matching(&Advertisement::has_manufacturer_data)
            .await;
        assert_eq!(found, Some(wanted));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_ends_stream() {
        let (tx, rx) = mpsc::channel(4);
        let mut subscription = Subscription::new(rx, None);

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(tx.send(advertisement(TEST_ADDRESS, &[0x00], None)).await.is_err());
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_aborts_feeding_task() {
        let (_tx, rx) = mpsc::channel::<Advertisement>(1);
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        let mut subscription = Subscription::new(rx, Some(task));

        subscription.unsubscribe();
        // The sender is dropped only when the aborted task is torn down.
        assert!(alive_rx.await.is_err());
    }
}
