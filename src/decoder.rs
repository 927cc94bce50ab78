//! Swissinno manufacturer-data payload decoder.
//!
//! Layout (offsets into the manufacturer-specific data, company ID excluded):
//!
//! | Offset | Size | Meaning |
//! |--------|------|---------|
//! | 0 | 1 | status: `0x00` idle, `0x01` triggered |
//! | 1..7 | 6 | vendor data, not interpreted |
//! | 7 | 2 | battery code, little-endian |
//!
//! Payload length is not fixed by the firmware, so decoding never fails: fields
//! the payload is too short to carry are simply absent.

use crate::reading::{PartialReading, TrapStatus};

/// Offset of the status byte.
pub const STATUS_OFFSET: usize = 0;

/// Offset of the little-endian battery code.
pub const BATTERY_OFFSET: usize = 7;

/// Minimum payload length that carries a battery code.
pub const BATTERY_MIN_LEN: usize = BATTERY_OFFSET + 2;

/// Decode a manufacturer-data payload.
pub fn decode(payload: &[u8]) -> PartialReading {
    let status = payload.get(STATUS_OFFSET).copied().map(TrapStatus::from_byte);

    if let Some(TrapStatus::Unknown(byte)) = status {
        tracing::debug!(status = %format_args!("0x{byte:02X}"), "unknown status byte");
    }

    PartialReading {
        status,
        raw_battery_code: parse_battery_raw(payload),
        raw_hex: hex::encode_upper(payload),
    }
}

/// Raw battery code from bytes 7..9, if the payload is long enough.
pub fn parse_battery_raw(payload: &[u8]) -> Option<u16> {
    payload
        .get(BATTERY_OFFSET..BATTERY_MIN_LEN)
        .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::payload;

    #[test]
    fn test_decode_empty_payload() {
        let partial = decode(&[]);
        assert_eq!(partial.status, None);
        assert_eq!(partial.raw_battery_code, None);
        assert_eq!(partial.raw_hex, "");
    }

    #[test]
    fn test_decode_status_bytes() {
        assert_eq!(decode(&[0x00]).status.and_then(TrapStatus::triggered), Some(false));
        assert_eq!(decode(&[0x01]).status.and_then(TrapStatus::triggered), Some(true));

        let unknown = decode(&[0x02]);
        assert_eq!(unknown.status, Some(TrapStatus::Unknown(0x02)));
        assert_eq!(unknown.status.and_then(TrapStatus::triggered), None);
    }

    #[test]
    fn test_decode_short_payload_has_no_battery() {
        let partial = decode(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0xD5]);
        assert_eq!(partial.status, Some(TrapStatus::Triggered));
        assert_eq!(partial.raw_battery_code, None);
        assert_eq!(partial.raw_hex, "01020304050607D5");
    }

    #[test]
    fn test_decode_battery_is_little_endian() {
        let partial = decode(&payload(0x00, 0x01D5));
        assert_eq!(partial.raw_battery_code, Some(0x01D5));
        assert_eq!(partial.raw_hex, "00000000000000D501");
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut long = payload(0x00, 0x0145);
        let base = decode(&long).raw_battery_code;
        long.extend_from_slice(&[0xFF, 0xEE, 0xDD, 0xCC]);
        assert_eq!(decode(&long).raw_battery_code, base);
        assert_eq!(base, Some(0x0145));
    }

    #[test]
    fn test_decode_hex_is_uppercase() {
        assert_eq!(decode(&[0xab, 0xcd, 0xef]).raw_hex, "ABCDEF");
    }

    #[test]
    fn test_parse_battery_raw_exact_length() {
        let data = [0u8, 0, 0, 0, 0, 0, 0, 0x34, 0x12];
        assert_eq!(parse_battery_raw(&data), Some(0x1234));
        assert_eq!(parse_battery_raw(&data[..8]), None);
    }
}
