//! Selection of the Swissinno payload from an advertisement.

use crate::address::DeviceAddress;
use crate::scanner::Advertisement;

/// Company identifiers used by Swissinno firmware.
///
/// The vendor's firmware has been seen with both byte orders of the same ID,
/// so both are accepted. Order matters: the first match wins.
pub const MANUFACTURER_IDS: [u16; 2] = [0xBB0B, 0x0BBB];

/// Outcome of routing one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSelection<'a> {
    /// Advertisement from another device
    ForeignDevice,
    /// Payload found under one of [`MANUFACTURER_IDS`]
    Known { manufacturer_id: u16, payload: &'a [u8] },
    /// The only manufacturer-data entry, under an ID we do not recognize
    Unrecognized { manufacturer_id: u16, payload: &'a [u8] },
    /// Nothing to decode
    NoPayload,
}

impl<'a> PayloadSelection<'a> {
    /// The payload to hand to the decoder, if any.
    pub fn payload(&self) -> Option<&'a [u8]> {
        match *self {
            PayloadSelection::Known { payload, .. }
            | PayloadSelection::Unrecognized { payload, .. } => Some(payload),
            PayloadSelection::ForeignDevice | PayloadSelection::NoPayload => None,
        }
    }
}

/// Routes advertisements for a single configured trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Router {
    address: DeviceAddress,
}

impl Router {
    pub fn new(address: DeviceAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn select<'a>(&self, advertisement: &'a Advertisement) -> PayloadSelection<'a> {
        if advertisement.address != self.address {
            return PayloadSelection::ForeignDevice;
        }

        let data = &advertisement.manufacturer_data;

        for manufacturer_id in MANUFACTURER_IDS {
            if let Some(payload) = data.get(&manufacturer_id).filter(|p| !p.is_empty()) {
                tracing::trace!(
                    address = %self.address,
                    manufacturer_id = %format_args!("0x{manufacturer_id:04X}"),
                    "found manufacturer data"
                );
                return PayloadSelection::Known {
                    manufacturer_id,
                    payload,
                };
            }
        }

        let mut entries = data
            .iter()
            .filter(|(id, _)| !MANUFACTURER_IDS.contains(id));
        match (entries.next(), entries.next()) {
            (Some((&manufacturer_id, payload)), None) => {
                tracing::debug!(
                    address = %self.address,
                    manufacturer_id = %format_args!("0x{manufacturer_id:04X}"),
                    "using manufacturer data with unexpected ID"
                );
                PayloadSelection::Unrecognized {
                    manufacturer_id,
                    payload,
                }
            }
            (Some(_), Some(_)) => {
                tracing::debug!(
                    address = %self.address,
                    ids = ?data.keys().collect::<Vec<_>>(),
                    "ambiguous manufacturer data, none recognized"
                );
                PayloadSelection::NoPayload
            }
            (None, _) => PayloadSelection::NoPayload,
        }
    }
}
