//! Remote reset of a triggered trap.
//!
//! Resetting is a single GATT write of `0x00` to the trap's reset
//! characteristic (`0x01` would mark it triggered). The trap needs a moment to
//! latch the new state before the link is dropped.

use crate::address::DeviceAddress;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Characteristic that holds the trap's triggered flag.
pub const RESET_CHARACTERISTIC: Uuid = Uuid::from_u128(0x02ecc6cd_2b43_4db5_96e6_ede92cf8778d);

/// Value written to clear the triggered flag.
pub const RESET_VALUE: [u8; 1] = [0x00];

/// Time the trap needs after the write before the connection is closed.
pub const RESET_SETTLE_TIME: Duration = Duration::from_secs(1);

/// Errors returned by a reset attempt.
#[derive(Error, Debug)]
pub enum ResetError {
    #[error("a reset of {0} is already in progress")]
    InProgress(DeviceAddress),
    #[error("Bluetooth device with address {0} not found")]
    DeviceNotFound(DeviceAddress),
    #[error("characteristic {uuid} not found on {address}")]
    CharacteristicNotFound { address: DeviceAddress, uuid: Uuid },
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// One characteristic write on a connected trap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest<'a> {
    pub address: DeviceAddress,
    pub characteristic: Uuid,
    pub value: &'a [u8],
    /// How long to hold the connection open after the write
    pub settle: Duration,
}

/// Connects to a device and writes one characteristic.
pub trait CharacteristicWriter: Send + Sync {
    fn write_characteristic<'a>(
        &'a self,
        request: WriteRequest<'a>,
    ) -> BoxFuture<'a, Result<(), ResetError>>;
}

/// The reset button of one trap.
///
/// While a reset is running the button reports itself unavailable and further
/// presses are rejected.
#[derive(Debug)]
pub struct ResetButton {
    address: DeviceAddress,
    name: String,
    busy: AtomicBool,
}

impl ResetButton {
    pub fn new(address: DeviceAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            busy: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self) -> bool {
        !self.busy.load(Ordering::Acquire)
    }

    /// Write the reset value to the trap.
    pub async fn press(&self, writer: &dyn CharacteristicWriter) -> Result<(), ResetError> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(ResetError::InProgress(self.address));
        }

        tracing::debug!(address = %self.address, "sending reset command");
        let result = writer
            .write_characteristic(WriteRequest {
                address: self.address,
                characteristic: RESET_CHARACTERISTIC,
                value: &RESET_VALUE,
                settle: RESET_SETTLE_TIME,
            })
            .await;

        match &result {
            Ok(()) => tracing::info!(address = %self.address, name = %self.name, "trap reset"),
            Err(error) => tracing::error!(
                address = %self.address,
                name = %self.name,
                %error,
                "failed to reset trap"
            ),
        }

        self.busy.store(false, Ordering::Release);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_ADDRESS;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(DeviceAddress, Uuid, Vec<u8>, Duration)>>,
        fail: bool,
    }

    impl CharacteristicWriter for RecordingWriter {
        fn write_characteristic<'a>(
            &'a self,
            request: WriteRequest<'a>,
        ) -> BoxFuture<'a, Result<(), ResetError>> {
            Box::pin(async move {
                self.writes.lock().unwrap().push((
                    request.address,
                    request.characteristic,
                    request.value.to_vec(),
                    request.settle,
                ));
                if self.fail {
                    Err(ResetError::DeviceNotFound(request.address))
                } else {
                    Ok(())
                }
            })
        }
    }

    /// Blocks inside the write until released.
    struct BlockingWriter {
        entered: Notify,
        release: Notify,
    }

    impl CharacteristicWriter for BlockingWriter {
        fn write_characteristic<'a>(
            &'a self,
            _request: WriteRequest<'a>,
        ) -> BoxFuture<'a, Result<(), ResetError>> {
            Box::pin(async move {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(())
            })
        }
    }

    #[test]
    fn test_reset_characteristic_uuid() {
        assert_eq!(
            RESET_CHARACTERISTIC.to_string(),
            "02ecc6cd-2b43-4db5-96e6-ede92cf8778d"
        );
    }

    #[tokio::test]
    async fn test_press_writes_zero_to_reset_characteristic() {
        let writer = RecordingWriter::default();
        let button = ResetButton::new(TEST_ADDRESS, "Kitchen");

        button.press(&writer).await.unwrap();

        let writes = writer.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![(
                TEST_ADDRESS,
                RESET_CHARACTERISTIC,
                vec![0x00],
                Duration::from_secs(1)
            )]
        );
        assert!(button.available());
    }

    #[tokio::test]
    async fn test_press_failure_is_reported_and_button_reenabled() {
        let writer = RecordingWriter {
            fail: true,
            ..Default::default()
        };
        let button = ResetButton::new(TEST_ADDRESS, "Kitchen");

        let err = button.press(&writer).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bluetooth device with address AA:BB:CC:DD:EE:FF not found"
        );
        assert!(button.available());
    }

    #[tokio::test]
    async fn test_concurrent_press_is_rejected() {
        let writer = BlockingWriter {
            entered: Notify::new(),
            release: Notify::new(),
        };
        let button = ResetButton::new(TEST_ADDRESS, "Kitchen");

        let first = button.press(&writer);
        let second = async {
            writer.entered.notified().await;
            assert!(!button.available());
            let result = button.press(&writer).await;
            writer.release.notify_one();
            result
        };

        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert!(matches!(second, Err(ResetError::InProgress(_))));
        assert!(button.available());
    }
}
