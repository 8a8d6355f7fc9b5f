//! Decoding of raw GATT characteristic payloads into typed readings.
//!
//! These are the only two wire formats this crate understands; both are
//! Bluetooth SIG standards. Decoding never fails: malformed input yields
//! `None` and callers treat that as "no update".

/// Decodes a Heart Rate Measurement payload (characteristic 0x2A37).
///
/// The first byte is a flags field. Bit 0 selects the value width: set means
/// a little-endian u16 at offset 1, clear means a single u8 at offset 1.
/// Frames too short to carry the selected width decode to `None` — some
/// straps emit empty frames between contacts.
pub fn decode_heart_rate(payload: &[u8]) -> Option<u16> {
    let (&flags, value) = payload.split_first()?;
    if flags & 0x01 != 0 {
        if value.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([value[0], value[1]]))
    } else {
        value.first().map(|&bpm| u16::from(bpm))
    }
}

/// Decodes a Battery Level payload (characteristic 0x2A19).
///
/// The first byte is the percentage. Peripherals occasionally report just
/// over 100 due to rounding, so out-of-range values are clamped, not
/// rejected.
pub fn decode_battery_level(payload: &[u8]) -> Option<u8> {
    payload.first().map(|&percent| percent.min(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heart_rate_u8_format() {
        assert_eq!(decode_heart_rate(&[0x00, 72]), Some(72));
        assert_eq!(decode_heart_rate(&[0x16, 180]), Some(180));
    }

    #[test]
    fn test_heart_rate_u16_format() {
        // 0x0141 = 321 bpm, little-endian at offset 1
        assert_eq!(decode_heart_rate(&[0x01, 0x41, 0x01]), Some(321));
        assert_eq!(decode_heart_rate(&[0x01, 0x48, 0x00]), Some(72));
    }

    #[test]
    fn test_heart_rate_short_frames_are_no_reading() {
        assert_eq!(decode_heart_rate(&[]), None);
        assert_eq!(decode_heart_rate(&[0x00]), None);
        // u16 format truncated after the flags byte
        assert_eq!(decode_heart_rate(&[0x01, 0x48]), None);
    }

    #[test]
    fn test_battery_level_passthrough_and_clamp() {
        assert_eq!(decode_battery_level(&[0]), Some(0));
        assert_eq!(decode_battery_level(&[57]), Some(57));
        assert_eq!(decode_battery_level(&[100]), Some(100));
        assert_eq!(decode_battery_level(&[101]), Some(100));
        assert_eq!(decode_battery_level(&[255]), Some(100));
    }

    #[test]
    fn test_battery_level_empty_is_no_reading() {
        assert_eq!(decode_battery_level(&[]), None);
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        // Energy-expended and RR-interval fields may follow the value
        assert_eq!(decode_heart_rate(&[0x00, 64, 0x12, 0x34]), Some(64));
        assert_eq!(decode_battery_level(&[42, 0xFF]), Some(42));
    }
}
