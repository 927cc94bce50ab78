//! Bluetooth device address used as the identity of a trap.
//!
//! Addresses are stored as six raw bytes so that comparisons are
//! case-insensitive by construction: `aa:bb:...` and `AA:BB:...` parse to the
//! same value.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    /// Lowercase colon-separated form, used for entity unique IDs.
    pub fn to_lowercase_string(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a device address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseAddressError {
    #[error("invalid address '{0}': expected AA:BB:CC:DD:EE:FF")]
    InvalidFormat(String),
    #[error("invalid address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for DeviceAddress {
    type Err = ParseAddressError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` and `AABBCCDDEEFF`,
    /// in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = if trimmed.contains(':') {
            trimmed.split(':').collect()
        } else if trimmed.contains('-') {
            trimmed.split('-').collect()
        } else if trimmed.len() == 12 && trimmed.is_ascii() {
            (0..6).map(|i| &trimmed[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(ParseAddressError::InvalidFormat(s.to_string()));
        };

        if parts.len() != 6 || parts.iter().any(|part| part.len() != 2) {
            return Err(ParseAddressError::InvalidFormat(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(&parts) {
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ParseAddressError::InvalidHex(part.to_string()))?;
        }

        Ok(DeviceAddress(bytes))
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for DeviceAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<DeviceAddress> for bluer::Address {
    fn from(addr: DeviceAddress) -> Self {
        bluer::Address(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_uppercase() {
        let addr = DeviceAddress([0xaa, 0x0b, 0xcc, 0x01, 0xee, 0xff]);
        assert_eq!(addr.to_string(), "AA:0B:CC:01:EE:FF");
        assert_eq!(addr.to_lowercase_string(), "aa:0b:cc:01:ee:ff");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let upper: DeviceAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let lower: DeviceAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_parse_alternative_separators() {
        let expected = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!("aa-bb-cc-dd-ee-ff".parse::<DeviceAddress>(), Ok(expected));
        assert_eq!("AABBCCDDEEFF".parse::<DeviceAddress>(), Ok(expected));
        assert_eq!(" AA:BB:CC:DD:EE:FF ".parse::<DeviceAddress>(), Ok(expected));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            "AA:BB:CC".parse::<DeviceAddress>(),
            Err(ParseAddressError::InvalidFormat(_))
        ));
        assert!(matches!(
            "AAA:BB:CC:DD:EE:F".parse::<DeviceAddress>(),
            Err(ParseAddressError::InvalidFormat(_))
        ));
        assert!(matches!(
            "AA:BB:CC:DD:EE:GG".parse::<DeviceAddress>(),
            Err(ParseAddressError::InvalidHex(_))
        ));
        assert!(matches!(
            "trap".parse::<DeviceAddress>(),
            Err(ParseAddressError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_serde_uses_string_form() {
        let addr = DeviceAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");
        let back: DeviceAddress = serde_json::from_str("\"01-02-03-04-05-06\"").unwrap();
        assert_eq!(back, addr);
    }
}
