//! Typed packets carried inside an envelope.
//!
//! ## Packet Format
//!
//! ```text
//! +--------+--------+---------------------------+
//! |   ID   |  Size  |           Body            |
//! +--------+--------+---------------------------+
//! | u16 LE | u16 LE |        size bytes         |
//! +--------+--------+---------------------------+
//! ```
//!
//! Every packet owns one immutable byte buffer. Typed views only read fixed
//! offsets from it, so the buffer is the single source of truth. Reads past
//! the end of a short buffer yield zeroes; the decoder reports such buffers as
//! [`ShapeWarning`]s instead of failing, because radios in the field emit
//! them.

mod bootloader;
mod radio;

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::{Error, Result};

pub use bootloader::{
    BeaconAck, DEFAULT_V2_VERSION, DEFAULT_V5_VERSION, FLASH_CHUNK_SIZE, FlashVersionReq,
    FlashWriteAck, FlashWriteReq, Generation, KEY_SLOTS, VERSION_FIELD_LEN,
};
pub use radio::{
    DEFAULT_TIMESTAMP, HelloAck, HelloReq, HelloTestReq, MAX_EEPROM_WRITE, ReadAdcAck,
    ReadAdcReq, ReadEepromAck, ReadEepromReq, ReadRssiAck, ReadRssiReq, RebootReq,
    WriteEepromAck, WriteEepromReq,
};

/// Length of the `(id, size)` header.
pub const HEADER_LEN: usize = 4;

/// Packet identifiers.
pub mod id {
    /// Host greeting in firmware mode.
    pub const HELLO_REQ: u16 = 0x0514;
    /// Firmware greeting reply.
    pub const HELLO_ACK: u16 = 0x0515;
    /// Bootloader beacon, legacy generation.
    pub const BEACON_V2: u16 = 0x0518;
    /// Flash chunk write, legacy generation.
    pub const WRITE_REQ_V2: u16 = 0x0519;
    /// Flash chunk acknowledgement, legacy generation.
    pub const WRITE_ACK_V2: u16 = 0x051a;
    /// EEPROM block read.
    pub const READ_EEPROM_REQ: u16 = 0x051b;
    /// EEPROM block read reply.
    pub const READ_EEPROM_ACK: u16 = 0x051c;
    /// EEPROM block write.
    pub const WRITE_EEPROM_REQ: u16 = 0x051d;
    /// EEPROM block write reply.
    pub const WRITE_EEPROM_ACK: u16 = 0x051e;
    /// RSSI query.
    pub const READ_RSSI_REQ: u16 = 0x0527;
    /// RSSI reply.
    pub const READ_RSSI_ACK: u16 = 0x0528;
    /// Battery ADC query.
    pub const READ_ADC_REQ: u16 = 0x0529;
    /// Battery ADC reply.
    pub const READ_ADC_ACK: u16 = 0x052a;
    /// Test-mode greeting.
    pub const HELLO_TEST_REQ: u16 = 0x052f;
    /// Firmware version negotiation, legacy generation.
    pub const VERSION_REQ_V2: u16 = 0x0530;
    /// Bootloader beacon, V5 generation.
    pub const BEACON_V5: u16 = 0x057a;
    /// Flash chunk write, V5 generation.
    pub const WRITE_REQ_V5: u16 = 0x057b;
    /// Flash chunk acknowledgement, V5 generation.
    pub const WRITE_ACK_V5: u16 = 0x057c;
    /// Firmware version negotiation, V5 generation.
    pub const VERSION_REQ_V5: u16 = 0x057d;
    /// Reboot into the bootloader.
    pub const REBOOT_REQ: u16 = 0x05dd;
}

/// Owned packet bytes with bounds-tolerant field reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket(Vec<u8>);

impl RawPacket {
    /// Wrap bytes that carry at least a packet header.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Framing(format!(
                "packet of {} bytes is shorter than its header [{}]",
                bytes.len(),
                hex::encode(&bytes)
            )));
        }
        Ok(Self(bytes))
    }

    /// Zero-filled packet with the header laid out.
    fn with_layout(id: u16, body_len: usize) -> Self {
        let mut bytes = vec![0u8; HEADER_LEN + body_len];
        LittleEndian::write_u16(&mut bytes[0..2], id);
        LittleEndian::write_u16(&mut bytes[2..4], u16::try_from(body_len).unwrap_or(u16::MAX));
        Self(bytes)
    }

    /// Packet identifier.
    pub fn id(&self) -> u16 {
        self.u16_at(0)
    }

    /// Body length declared in the header.
    pub fn declared_size(&self) -> u16 {
        self.u16_at(2)
    }

    /// Body bytes actually present.
    pub fn body(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    /// Full packet bytes, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the packet bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    fn field<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.0.get(offset..) {
            let n = src.len().min(N);
            out[..n].copy_from_slice(&src[..n]);
        }
        out
    }

    fn u8_at(&self, offset: usize) -> u8 {
        self.0.get(offset).copied().unwrap_or(0)
    }

    fn u16_at(&self, offset: usize) -> u16 {
        LittleEndian::read_u16(&self.field::<2>(offset))
    }

    fn u32_at(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.field::<4>(offset))
    }

    /// Up to `len` bytes starting at `offset`, clamped to the buffer.
    fn slice(&self, offset: usize, len: usize) -> &[u8] {
        let start = offset.min(self.0.len());
        let end = offset.saturating_add(len).min(self.0.len());
        &self.0[start..end]
    }

    /// NUL-terminated text of at most `max` bytes.
    fn text_at(&self, offset: usize, max: usize) -> String {
        let bytes = self.slice(offset, max);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        LittleEndian::write_u16(&mut self.0[offset..offset + 2], value);
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.0[offset..offset + 4], value);
    }

    fn put_bytes(&mut self, offset: usize, data: &[u8]) {
        self.0[offset..offset + data.len()].copy_from_slice(data);
    }

    fn put_u8(&mut self, offset: usize, value: u8) {
        self.0[offset] = value;
    }
}

/// Non-fatal disagreement between a packet's header and its buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeWarning {
    /// Packet name.
    pub packet: &'static str,
    /// What disagreed.
    pub message: String,
}

impl fmt::Display for ShapeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.packet, self.message)
    }
}

/// Common behaviour of typed packet views.
pub(crate) trait PacketView {
    /// Display name.
    const NAME: &'static str;

    /// Underlying bytes.
    fn raw(&self) -> &RawPacket;

    /// Variant-specific shape checks beyond the generic size check.
    fn check(&self, _warn: &mut dyn FnMut(String)) {}
}

macro_rules! packet_view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub(crate) RawPacket);

        impl $name {
            /// Underlying packet bytes.
            pub fn raw(&self) -> &RawPacket {
                &self.0
            }
        }
    };
}
pub(crate) use packet_view;

/// Warn unless the declared body size equals `expected`.
fn expect_size(raw: &RawPacket, expected: u16, warn: &mut dyn FnMut(String)) {
    if raw.declared_size() != expected {
        warn(format!(
            "declared size {}, expected {expected}",
            raw.declared_size()
        ));
    }
}

packet_view!(
    /// Packet with an identifier outside the known table.
    UnknownPacket
);

impl PacketView for UnknownPacket {
    const NAME: &'static str = "Unknown";

    fn raw(&self) -> &RawPacket {
        &self.0
    }
}

impl fmt::Display for UnknownPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown {{ id=0x{:04x} size=0x{:04x} data={} }}",
            self.0.id(),
            self.0.declared_size(),
            hex::encode(self.0.body())
        )
    }
}

/// Any packet the tool can send or receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Host greeting.
    HelloReq(HelloReq),
    /// Firmware greeting reply.
    HelloAck(HelloAck),
    /// Test-mode greeting.
    HelloTestReq(HelloTestReq),
    /// EEPROM block read.
    ReadEepromReq(ReadEepromReq),
    /// EEPROM block read reply.
    ReadEepromAck(ReadEepromAck),
    /// EEPROM block write.
    WriteEepromReq(WriteEepromReq),
    /// EEPROM block write reply.
    WriteEepromAck(WriteEepromAck),
    /// RSSI query.
    ReadRssiReq(ReadRssiReq),
    /// RSSI reply.
    ReadRssiAck(ReadRssiAck),
    /// Battery ADC query.
    ReadAdcReq(ReadAdcReq),
    /// Battery ADC reply.
    ReadAdcAck(ReadAdcAck),
    /// Reboot request.
    RebootReq(RebootReq),
    /// Bootloader beacon (either generation).
    BeaconAck(BeaconAck),
    /// Firmware version negotiation (either generation).
    FlashVersionReq(FlashVersionReq),
    /// Flash chunk write (either generation).
    FlashWriteReq(FlashWriteReq),
    /// Flash chunk acknowledgement (either generation).
    FlashWriteAck(FlashWriteAck),
    /// Unrecognised identifier.
    Unknown(UnknownPacket),
}

macro_rules! each_variant {
    ($packet:expr, $p:ident => $body:expr) => {
        match $packet {
            Packet::HelloReq($p) => $body,
            Packet::HelloAck($p) => $body,
            Packet::HelloTestReq($p) => $body,
            Packet::ReadEepromReq($p) => $body,
            Packet::ReadEepromAck($p) => $body,
            Packet::WriteEepromReq($p) => $body,
            Packet::WriteEepromAck($p) => $body,
            Packet::ReadRssiReq($p) => $body,
            Packet::ReadRssiAck($p) => $body,
            Packet::ReadAdcReq($p) => $body,
            Packet::ReadAdcAck($p) => $body,
            Packet::RebootReq($p) => $body,
            Packet::BeaconAck($p) => $body,
            Packet::FlashVersionReq($p) => $body,
            Packet::FlashWriteReq($p) => $body,
            Packet::FlashWriteAck($p) => $body,
            Packet::Unknown($p) => $body,
        }
    };
}

/// Result of decoding a packet: the variant plus every shape complaint.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Decoded packet.
    pub packet: Packet,
    /// Non-fatal shape warnings, in detection order.
    pub warnings: Vec<ShapeWarning>,
}

fn view<V: PacketView>(make: fn(RawPacket) -> V, raw: RawPacket, warnings: &mut Vec<ShapeWarning>) -> V {
    let packet = make(raw);
    packet.check(&mut |message| {
        warnings.push(ShapeWarning {
            packet: V::NAME,
            message,
        });
    });
    packet
}

impl Packet {
    /// Decode packet bytes into a typed variant.
    ///
    /// Fails only when the buffer cannot hold a header. Shape problems are
    /// returned in [`Decoded::warnings`].
    pub fn decode(bytes: &[u8]) -> Result<Decoded> {
        let raw = RawPacket::new(bytes.to_vec())?;
        let mut warnings = Vec::new();

        let body_len = raw.body().len();
        let declared = usize::from(raw.declared_size());

        let packet = match raw.id() {
            id::HELLO_REQ => Self::HelloReq(view(HelloReq, raw, &mut warnings)),
            id::HELLO_ACK => Self::HelloAck(view(HelloAck, raw, &mut warnings)),
            id::HELLO_TEST_REQ => Self::HelloTestReq(view(HelloTestReq, raw, &mut warnings)),
            id::READ_EEPROM_REQ => Self::ReadEepromReq(view(ReadEepromReq, raw, &mut warnings)),
            id::READ_EEPROM_ACK => Self::ReadEepromAck(view(ReadEepromAck, raw, &mut warnings)),
            id::WRITE_EEPROM_REQ => {
                Self::WriteEepromReq(view(WriteEepromReq, raw, &mut warnings))
            },
            id::WRITE_EEPROM_ACK => {
                Self::WriteEepromAck(view(WriteEepromAck, raw, &mut warnings))
            },
            id::READ_RSSI_REQ => Self::ReadRssiReq(view(ReadRssiReq, raw, &mut warnings)),
            id::READ_RSSI_ACK => Self::ReadRssiAck(view(ReadRssiAck, raw, &mut warnings)),
            id::READ_ADC_REQ => Self::ReadAdcReq(view(ReadAdcReq, raw, &mut warnings)),
            id::READ_ADC_ACK => Self::ReadAdcAck(view(ReadAdcAck, raw, &mut warnings)),
            id::REBOOT_REQ => Self::RebootReq(view(RebootReq, raw, &mut warnings)),
            id::BEACON_V2 | id::BEACON_V5 => Self::BeaconAck(view(BeaconAck, raw, &mut warnings)),
            id::VERSION_REQ_V2 | id::VERSION_REQ_V5 => {
                Self::FlashVersionReq(view(FlashVersionReq, raw, &mut warnings))
            },
            id::WRITE_REQ_V2 | id::WRITE_REQ_V5 => {
                Self::FlashWriteReq(view(FlashWriteReq, raw, &mut warnings))
            },
            id::WRITE_ACK_V2 | id::WRITE_ACK_V5 => {
                Self::FlashWriteAck(view(FlashWriteAck, raw, &mut warnings))
            },
            _ => {
                let packet = UnknownPacket(raw);
                warn!("Unknown packet {packet}");
                Self::Unknown(packet)
            },
        };

        if body_len != declared {
            warnings.insert(
                0,
                ShapeWarning {
                    packet: packet.name(),
                    message: format!(
                        "declared size {declared} but buffer carries {body_len} body bytes"
                    ),
                },
            );
        }

        Ok(Decoded { packet, warnings })
    }

    /// Display name of the variant.
    pub fn name(&self) -> &'static str {
        fn name_of<V: PacketView>(_: &V) -> &'static str {
            V::NAME
        }
        each_variant!(self, p => name_of(p))
    }

    /// Underlying bytes.
    pub fn raw(&self) -> &RawPacket {
        each_variant!(self, p => PacketView::raw(p))
    }

    /// Packet identifier.
    pub fn id(&self) -> u16 {
        self.raw().id()
    }

    /// Packet bytes, ready for the envelope codec.
    pub fn as_bytes(&self) -> &[u8] {
        self.raw().as_bytes()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        each_variant!(self, p => fmt::Display::fmt(p, f))
    }
}

macro_rules! into_packet {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Packet {
                fn from(packet: $variant) -> Self {
                    Self::$variant(packet)
                }
            }
        )*
    };
}

into_packet!(
    HelloReq,
    HelloAck,
    HelloTestReq,
    ReadEepromReq,
    ReadEepromAck,
    WriteEepromReq,
    WriteEepromAck,
    ReadRssiReq,
    ReadRssiAck,
    ReadAdcReq,
    ReadAdcAck,
    RebootReq,
    BeaconAck,
    FlashVersionReq,
    FlashWriteReq,
    FlashWriteAck,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn from_hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_decode_requires_header() {
        assert!(Packet::decode(&[0x14, 0x05, 0x00]).is_err());
        assert!(Packet::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rssi_ack_capture() {
        let decoded = Packet::decode(&from_hex("280504007a003b29")).unwrap();
        assert!(decoded.warnings.is_empty());
        let Packet::ReadRssiAck(ack) = decoded.packet else {
            panic!("expected rssi ack");
        };
        assert_eq!(ack.rssi(), 0x007a);
        assert_eq!(ack.ex_noise_indicator(), 0x3b);
        assert_eq!(ack.glitch_indicator(), 0x29);
    }

    #[test]
    fn test_decode_unknown_keeps_bytes() {
        let bytes = from_hex("34120200aabb");
        let decoded = Packet::decode(&bytes).unwrap();
        assert!(matches!(decoded.packet, Packet::Unknown(_)));
        assert_eq!(decoded.packet.id(), 0x1234);
        assert_eq!(decoded.packet.as_bytes(), bytes.as_slice());
        assert!(decoded.packet.to_string().contains("aabb"));
    }

    #[test]
    fn test_size_mismatch_is_warning_not_error() {
        // RSSI ack declaring 4 body bytes but carrying 2
        let decoded = Packet::decode(&from_hex("280504007a00")).unwrap();
        assert!(matches!(decoded.packet, Packet::ReadRssiAck(_)));
        assert_eq!(decoded.warnings.len(), 1);
        assert!(decoded.warnings[0].message.contains("declared size 4"));

        // Missing fields read as zero
        let Packet::ReadRssiAck(ack) = decoded.packet else {
            unreachable!()
        };
        assert_eq!(ack.glitch_indicator(), 0);
    }

    #[test]
    fn test_variant_size_check_warns() {
        // Write EEPROM ack must carry 2 body bytes
        let decoded = Packet::decode(&from_hex("1e0504002000ffff")).unwrap();
        assert!(matches!(decoded.packet, Packet::WriteEepromAck(_)));
        assert_eq!(decoded.warnings.len(), 1);
        assert_eq!(decoded.warnings[0].packet, "WriteEepromAck");
    }

    #[test]
    fn test_raw_text_stops_at_nul() {
        let raw = RawPacket::new(b"\x00\x00\x00\x00ab\x00cd".to_vec()).unwrap();
        assert_eq!(raw.text_at(4, 16), "ab");
        assert_eq!(raw.text_at(7, 16), "cd");
        assert_eq!(raw.text_at(40, 16), "");
    }

    #[test]
    fn test_packet_name_and_display() {
        let packet = Packet::from(ReadAdcReq::new());
        assert_eq!(packet.name(), "ReadAdcReq");
        assert_eq!(packet.as_bytes(), &[0x29, 0x05, 0x00, 0x00]);
        assert!(packet.to_string().starts_with("ReadAdcReq"));
    }
}
