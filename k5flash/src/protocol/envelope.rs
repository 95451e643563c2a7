//! Outer frame carried on the serial line.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+--------+------------------+--------+--------+
//! | Header | Length |     Payload      | CRC16  | Footer |
//! +--------+--------+------------------+--------+--------+
//! | 2 bytes| 2 bytes|   len bytes      | 2 bytes| 2 bytes|
//! +--------+--------+------------------+--------+--------+
//! | AB CD  | len LE |  XOR obfuscated  | XOR'd  | DC BA  |
//! +--------+--------+------------------+--------+--------+
//! ```
//!
//! The CRC is CRC16-XMODEM over the clear payload, stored little-endian, and
//! obfuscated together with the payload by a repeating 16-byte key.
//!
//! On receive the radio firmware never recomputes the checksum. It compares
//! the de-obfuscated CRC field against a value derived from the key alone, and
//! so does [`decode`]. The check detects nothing about payload corruption; a
//! mismatch is only logged.

use log::warn;

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_xmodem;

/// Frame header bytes.
pub const HEADER: [u8; 2] = [0xab, 0xcd];

/// Frame footer bytes.
pub const FOOTER: [u8; 2] = [0xdc, 0xba];

/// Bytes added around the payload (header, length, CRC, footer).
pub const OVERHEAD: usize = 8;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD: usize = 0xffff;

/// Declared CRC used by the firmware's running mode; never compared.
pub const CRC_SKIP: u16 = 0xffff;

const XOR_KEY: [u8; 16] = [
    0x16, 0x6c, 0x14, 0xe6, 0x2e, 0x91, 0x0d, 0x40, 0x21, 0x35, 0xd5, 0x40, 0x13, 0x03, 0xe9, 0x80,
];

fn obfuscate(data: &mut [u8]) {
    for (byte, key) in data
        .iter_mut()
        .zip(XOR_KEY.iter().cycle())
    {
        *byte ^= key;
    }
}

/// CRC value the radio expects to see for a payload of `size` bytes.
fn expected_crc(size: usize) -> u16 {
    let lo = XOR_KEY[size % XOR_KEY.len()] ^ 0xff;
    let hi = XOR_KEY[(size + 1) % XOR_KEY.len()] ^ 0xff;
    u16::from_le_bytes([lo, hi])
}

/// Wrap a packet payload into an obfuscated frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::Validation(format!(
            "payload length {} exceeds {MAX_PAYLOAD:#06x}",
            payload.len()
        ))
    })?;

    let mut frame = Vec::with_capacity(payload.len() + OVERHEAD);
    frame.extend_from_slice(&HEADER);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc16_xmodem(payload).to_le_bytes());
    obfuscate(&mut frame[4..]);
    frame.extend_from_slice(&FOOTER);
    Ok(frame)
}

/// Declared payload size of a frame, read from its (clear) length field.
pub fn declared_size(frame: &[u8]) -> Option<usize> {
    frame
        .get(2..4)
        .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])))
}

/// Unwrap a frame and return its payload.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < 4 || frame[..2] != HEADER {
        return Err(Error::Framing(format!(
            "bad header [{}]",
            hex::encode(frame)
        )));
    }
    let size = declared_size(frame).unwrap_or_default();
    if frame.len() < size + OVERHEAD {
        return Err(Error::Framing(format!(
            "frame of {} bytes is shorter than declared size {size:#06x} [{}]",
            frame.len(),
            hex::encode(frame)
        )));
    }
    if frame[size + 6..size + 8] != FOOTER {
        return Err(Error::Framing(format!(
            "bad footer [{}]",
            hex::encode(frame)
        )));
    }

    let mut body = frame[4..size + 6].to_vec();
    obfuscate(&mut body);

    let declared = u16::from_le_bytes([body[size], body[size + 1]]);
    let expected = expected_crc(size);
    if declared != CRC_SKIP && declared != expected {
        warn!("Envelope CRC field {declared:#06x}, radio expects {expected:#06x}");
    }

    body.truncate(size);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(&[0x14, 0x05, 0x04, 0x00]).unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[..4], &[0xab, 0xcd, 0x04, 0x00]);
        assert_eq!(&frame[10..], &FOOTER);
        // First payload byte is XORed with the first key byte
        assert_eq!(frame[4], 0x14 ^ 0x16);
    }

    #[test]
    fn test_round_trip_various_lengths() {
        for len in [0usize, 1, 15, 16, 17, 255, 0x10c, 4096] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let frame = encode(&payload).unwrap();
            assert_eq!(decode(&frame).unwrap(), payload, "len {len}");
        }
    }

    #[test]
    fn test_round_trip_max_payload() {
        let payload = vec![0x5a; MAX_PAYLOAD];
        let frame = encode(&payload).unwrap();
        assert_eq!(decode(&frame).unwrap(), payload);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0; MAX_PAYLOAD + 1];
        assert!(matches!(encode(&payload), Err(Error::Validation(_))));
    }

    #[test]
    fn test_decode_bad_header_is_fatal() {
        let mut frame = encode(&[1, 2, 3, 4]).unwrap();
        frame[0] = 0xaa;
        let err = decode(&frame).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
        assert!(err.to_string().contains("bad header"));

        for junk in [&[][..], &[0xab][..], &[0xcd, 0xab, 0, 0, 0, 0, 0xdc, 0xba][..]] {
            assert!(matches!(decode(junk), Err(Error::Framing(_))));
        }
    }

    #[test]
    fn test_decode_bad_footer_is_fatal() {
        let mut frame = encode(&[1, 2, 3, 4]).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x00;
        let err = decode(&frame).unwrap_err();
        assert!(err.to_string().contains("bad footer"));
    }

    #[test]
    fn test_decode_truncated_frame_is_fatal() {
        let frame = encode(&[1, 2, 3, 4]).unwrap();
        assert!(matches!(decode(&frame[..9]), Err(Error::Framing(_))));
    }

    #[test]
    fn test_decode_tolerates_crc_quirk() {
        // Radio-side frame with the running-mode CRC sentinel
        let payload = [0x28, 0x05, 0x04, 0x00, 0x7a, 0x00, 0x3b, 0x29];
        let mut frame = encode(&payload).unwrap();
        let size = payload.len();
        let mut crc = [0xff, 0xff];
        crc[0] ^= XOR_KEY[size % 16];
        crc[1] ^= XOR_KEY[(size + 1) % 16];
        frame[4 + size..6 + size].copy_from_slice(&crc);
        assert_eq!(decode(&frame).unwrap(), payload);
    }

    #[test]
    fn test_expected_crc_uses_key_positions() {
        assert_eq!(expected_crc(0), u16::from_le_bytes([0x16 ^ 0xff, 0x6c ^ 0xff]));
        assert_eq!(expected_crc(15), u16::from_le_bytes([0x80 ^ 0xff, 0x16 ^ 0xff]));
    }
}
