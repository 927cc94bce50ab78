//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to talk to the BlueZ daemon, so
//! `bluetoothd` must be running. Passive listening goes through BlueZ
//! advertisement monitors; active scans use a regular LE discovery session.
//! Every advertisement seen by either path is stamped with the current UTC
//! time and kept in a per-address cache.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, AdvertisementPredicate, AdvertisementSource,
    ScanError, ScanMode, Subscription, WaitOutcome, wait_on_subscription,
};
use crate::address::DeviceAddress;
use crate::reset::{CharacteristicWriter, ResetError, WriteRequest};
use crate::router::MANUFACTURER_IDS;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{
    Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use chrono::Utc;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

/// How long to scan for a trap BlueZ has not seen before connecting to it.
const CONNECT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

impl From<bluer::Error> for ResetError {
    fn from(err: bluer::Error) -> Self {
        ResetError::Bluetooth(err.to_string())
    }
}

impl From<ScanError> for ResetError {
    fn from(err: ScanError) -> Self {
        ResetError::Bluetooth(err.to_string())
    }
}

/// Most recent advertisement per address.
#[derive(Debug, Clone, Default)]
struct AdvertisementCache(Arc<Mutex<HashMap<DeviceAddress, Advertisement>>>);

impl AdvertisementCache {
    fn store(&self, advertisement: Advertisement) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(advertisement.address, advertisement);
    }

    fn get(&self, address: DeviceAddress) -> Option<Advertisement> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }
}

/// Monitor patterns matching both byte orders of the Swissinno company ID.
///
/// Company IDs are little-endian on the air.
fn manufacturer_patterns() -> Vec<Pattern> {
    MANUFACTURER_IDS
        .iter()
        .map(|id| Pattern {
            data_type: MANUFACTURER_DATA_TYPE,
            start_position: 0,
            content: id.to_le_bytes().to_vec(),
        })
        .collect()
}

/// Decides which discovery events for one device carry data heard just now.
///
/// Discovery starts by announcing every device BlueZ already knows, with
/// properties that may be long out of date. Later events for the same device
/// are real property changes.
#[derive(Debug)]
struct DiscoveryGate {
    replay_pending: bool,
}

impl DiscoveryGate {
    fn new(known_before_discovery: bool) -> Self {
        Self {
            replay_pending: known_before_discovery,
        }
    }

    /// `in_range` is whether BlueZ currently reports an RSSI for the device.
    fn admit(&mut self, in_range: bool) -> bool {
        if std::mem::take(&mut self.replay_pending) {
            return false;
        }
        in_range
    }
}

/// Advertisement source backed by the default BlueZ adapter.
pub struct BluerSource {
    _session: Session,
    adapter: Adapter,
    cache: AdvertisementCache,
}

impl BluerSource {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new() -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        tracing::info!(adapter = adapter.name(), "using Bluetooth adapter");

        Ok(Self {
            _session: session,
            adapter,
            cache: AdvertisementCache::default(),
        })
    }

    async fn watch_passive(
        &self,
        address: DeviceAddress,
        tx: mpsc::Sender<Advertisement>,
    ) -> Result<JoinHandle<()>, ScanError> {
        let monitor_manager = self.adapter.monitor().await?;
        let mut monitor_handle = monitor_manager
            .register(Monitor {
                patterns: Some(manufacturer_patterns()),
                ..Default::default()
            })
            .await?;

        let adapter = self.adapter.clone();
        let cache = self.cache.clone();

        Ok(tokio::spawn(async move {
            // Monitors are unregistered once their manager goes away.
            let _monitor_manager = monitor_manager;
            let mut changes: Option<BoxStream<'static, DeviceEvent>> = None;

            loop {
                tokio::select! {
                    event = monitor_handle.next() => match event {
                        Some(MonitorEvent::DeviceFound(id))
                            if DeviceAddress::from(id.device) == address =>
                        {
                            let Ok(device) = adapter.device(id.device) else {
                                continue;
                            };
                            if !publish_current(&device, address, &tx, &cache).await {
                                break;
                            }
                            // DeviceFound fires once; later advertisements
                            // arrive as property changes.
                            if changes.is_none() {
                                match device.events().await {
                                    Ok(stream) => changes = Some(stream.boxed()),
                                    Err(error) => tracing::debug!(
                                        %address, %error, "cannot watch device property changes"
                                    ),
                                }
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    change = next_change(&mut changes) => match change {
                        Some(DeviceEvent::PropertyChanged(DeviceProperty::ManufacturerData(data))) => {
                            if !publish(address, data, &tx, &cache).await {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => changes = None,
                    },
                }
            }
        }))
    }

    async fn watch_active(
        &self,
        address: DeviceAddress,
        tx: mpsc::Sender<Advertisement>,
    ) -> Result<JoinHandle<()>, ScanError> {
        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        };
        if let Err(error) = self.adapter.set_discovery_filter(filter).await {
            tracing::warn!(%error, "failed to set discovery filter");
        }

        let known = self.adapter.device_addresses().await?;
        let mut gate = DiscoveryGate::new(known.contains(&address.into()));

        // Discovery runs for as long as the event stream is alive.
        let mut events = Box::pin(self.adapter.discover_devices_with_changes().await?);
        let adapter = self.adapter.clone();
        let cache = self.cache.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(found) = event else {
                    continue;
                };
                if DeviceAddress::from(found) != address {
                    continue;
                }
                let Ok(device) = adapter.device(found) else {
                    continue;
                };
                let in_range = matches!(device.rssi().await, Ok(Some(_)));
                if !gate.admit(in_range) {
                    tracing::trace!(%address, in_range, "skipping cached device properties");
                    continue;
                }
                if !publish_current(&device, address, &tx, &cache).await {
                    break;
                }
            }
        }))
    }

    /// Make sure BlueZ knows the device, running a short active scan if not.
    async fn resolve_device(&self, address: DeviceAddress) -> Result<Device, ResetError> {
        let known = self.adapter.device_addresses().await?;
        if !known.contains(&address.into()) {
            tracing::debug!(%address, "device not cached by BlueZ; starting active scan");
            let outcome = self
                .wait_for_advertisement(
                    address,
                    &|_: &Advertisement| true,
                    ScanMode::Active,
                    CONNECT_DISCOVERY_TIMEOUT,
                )
                .await?;
            if outcome == WaitOutcome::Timeout {
                return Err(ResetError::DeviceNotFound(address));
            }
        }
        Ok(self.adapter.device(address.into())?)
    }
}

async fn next_change(changes: &mut Option<BoxStream<'static, DeviceEvent>>) -> Option<DeviceEvent> {
    match changes {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

/// Read the device's current manufacturer data and publish it.
///
/// Returns `false` once the subscriber has gone away.
async fn publish_current(
    device: &Device,
    address: DeviceAddress,
    tx: &mpsc::Sender<Advertisement>,
    cache: &AdvertisementCache,
) -> bool {
    match device.manufacturer_data().await {
        Ok(Some(data)) => publish(address, data, tx, cache).await,
        Ok(None) => true,
        Err(error) => {
            tracing::debug!(%address, %error, "failed to read manufacturer data");
            true
        }
    }
}

async fn publish(
    address: DeviceAddress,
    data: HashMap<u16, Vec<u8>>,
    tx: &mpsc::Sender<Advertisement>,
    cache: &AdvertisementCache,
) -> bool {
    let advertisement = Advertisement {
        address,
        manufacturer_data: data.into_iter().collect(),
        timestamp: Some(Utc::now()),
        // BlueZ does not expose the PDU type of the last advertisement.
        connectable: true,
    };
    cache.store(advertisement.clone());
    tx.send(advertisement).await.is_ok()
}

async fn find_characteristic(
    device: &Device,
    uuid: Uuid,
) -> Result<Option<bluer::gatt::remote::Characteristic>, bluer::Error> {
    for service in device.services().await? {
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == uuid {
                return Ok(Some(characteristic));
            }
        }
    }
    Ok(None)
}

impl AdvertisementSource for BluerSource {
    fn subscribe(
        &self,
        address: DeviceAddress,
        mode: ScanMode,
    ) -> BoxFuture<'_, Result<Subscription, ScanError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
            let task = match mode {
                ScanMode::Passive => self.watch_passive(address, tx).await?,
                ScanMode::Active => self.watch_active(address, tx).await?,
            };
            Ok(Subscription::new(rx, Some(task)))
        })
    }

    fn last_advertisement(&self, address: DeviceAddress) -> BoxFuture<'_, Option<Advertisement>> {
        Box::pin(async move { self.cache.get(address) })
    }

    fn wait_for_advertisement<'a>(
        &'a self,
        address: DeviceAddress,
        predicate: AdvertisementPredicate<'a>,
        mode: ScanMode,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<WaitOutcome, ScanError>> {
        Box::pin(wait_on_subscription(self, address, predicate, mode, timeout))
    }
}

impl CharacteristicWriter for BluerSource {
    fn write_characteristic<'a>(
        &'a self,
        request: WriteRequest<'a>,
    ) -> BoxFuture<'a, Result<(), ResetError>> {
        Box::pin(async move {
            let address = request.address;
            let device = self.resolve_device(address).await?;

            if !device.is_connected().await? {
                tracing::debug!(%address, "connecting");
                device.connect().await?;
            }

            let result = match find_characteristic(&device, request.characteristic).await? {
                Some(characteristic) => {
                    characteristic.write(request.value).await?;
                    tokio::time::sleep(request.settle).await;
                    Ok(())
                }
                None => Err(ResetError::CharacteristicNotFound {
                    address,
                    uuid: request.characteristic,
                }),
            };

            if let Err(error) = device.disconnect().await {
                tracing::debug!(%address, %error, "failed to disconnect cleanly");
            }
            result
        })
    }
}
