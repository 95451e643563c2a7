//! Packets spoken by the bootloader during a flash session.
//!
//! Two bootloader generations exist. They share packet layouts but use
//! different identifiers, and V5 adds a key selector to the version packet
//! and expects every write chunk to arrive AES encrypted.

use std::fmt;

use super::{PacketView, RawPacket, expect_size, id, packet_view};
use crate::error::{Error, Result};

/// Bytes carried by one flash write request.
pub const FLASH_CHUNK_SIZE: usize = 0x100;

/// Width of the version field in a version request.
pub const VERSION_FIELD_LEN: usize = 16;

/// Number of built-in V5 key slots.
pub const KEY_SLOTS: u8 = 16;

/// Version string the stock updater announces to a V2 bootloader.
pub const DEFAULT_V2_VERSION: &str = "2.01.23";

/// Version string the stock updater announces to a V5 bootloader.
pub const DEFAULT_V5_VERSION: &str = "5.00.05";

const WRITE_REQ_BODY: usize = 12 + FLASH_CHUNK_SIZE;

// Beacons captured from bootloaders 2.00.06 and 5.00.01.
const CAPTURED_BEACON_V2: [u8; 36] = [
    0x18, 0x05, 0x20, 0x00, 0x01, 0x02, 0x02, 0x0b, 0x0c, 0x53, 0x46, 0x34, 0x52, 0x59, 0xff, 0x08,
    0x8c, 0x00, 0x32, 0x00, 0x32, 0x2e, 0x30, 0x30, 0x2e, 0x30, 0x36, 0x00, 0x34, 0x0a, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x20,
];
const CAPTURED_BEACON_V5: [u8; 36] = [
    0x7a, 0x05, 0x20, 0x00, 0x01, 0x02, 0x02, 0x06, 0x1c, 0x53, 0x50, 0x4a, 0x37, 0x47, 0xff, 0x10,
    0x93, 0x00, 0x89, 0x00, 0x35, 0x2e, 0x30, 0x30, 0x2e, 0x30, 0x31, 0x00, 0x28, 0x0c, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x20,
];

/// Bootloader generation, selected by the beacon identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Legacy bootloader, plain-text chunks.
    V2,
    /// Newer bootloader, AES-128-CBC encrypted chunks.
    V5,
}

impl Generation {
    /// Generation announced by a beacon identifier.
    pub fn from_beacon_id(id: u16) -> Option<Self> {
        match id {
            id::BEACON_V2 => Some(Self::V2),
            id::BEACON_V5 => Some(Self::V5),
            _ => None,
        }
    }

    /// Generation owning any bootloader packet identifier.
    fn of(packet_id: u16) -> Self {
        match packet_id {
            id::BEACON_V5 | id::VERSION_REQ_V5 | id::WRITE_REQ_V5 | id::WRITE_ACK_V5 => Self::V5,
            _ => Self::V2,
        }
    }

    /// Beacon identifier.
    pub const fn beacon_id(self) -> u16 {
        match self {
            Self::V2 => id::BEACON_V2,
            Self::V5 => id::BEACON_V5,
        }
    }

    /// Version request identifier.
    pub const fn version_req_id(self) -> u16 {
        match self {
            Self::V2 => id::VERSION_REQ_V2,
            Self::V5 => id::VERSION_REQ_V5,
        }
    }

    /// Write request identifier.
    pub const fn write_req_id(self) -> u16 {
        match self {
            Self::V2 => id::WRITE_REQ_V2,
            Self::V5 => id::WRITE_REQ_V5,
        }
    }

    /// Write acknowledgement identifier.
    pub const fn write_ack_id(self) -> u16 {
        match self {
            Self::V2 => id::WRITE_ACK_V2,
            Self::V5 => id::WRITE_ACK_V5,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2 => f.write_str("V2"),
            Self::V5 => f.write_str("V5"),
        }
    }
}

fn version_field(version: &str, max_len: usize) -> Result<&[u8]> {
    if !version.is_ascii() {
        return Err(Error::Validation(format!("version {version:?} is not ASCII")));
    }
    if version.len() > max_len {
        return Err(Error::Validation(format!(
            "version {version:?} is longer than {max_len} bytes"
        )));
    }
    Ok(version.as_bytes())
}

packet_view!(
    /// Unsolicited bootloader announcement.
    BeaconAck
);

impl BeaconAck {
    /// Beacon exactly as a real bootloader of `generation` sends it.
    pub fn captured(generation: Generation) -> Self {
        let bytes = match generation {
            Generation::V2 => CAPTURED_BEACON_V2,
            Generation::V5 => CAPTURED_BEACON_V5,
        };
        Self(RawPacket(bytes.to_vec()))
    }

    /// Build a beacon with the given chip id and version (at most 11 bytes).
    pub fn new(generation: Generation, chip_id: [u32; 4], version: &str) -> Result<Self> {
        let text = version_field(version, 11)?;
        let mut raw = RawPacket::with_layout(generation.beacon_id(), 32);
        for (i, word) in chip_id.iter().enumerate() {
            raw.put_u32(4 + i * 4, *word);
        }
        raw.put_bytes(20, text);
        Ok(Self(raw))
    }

    /// Bootloader generation announced by this beacon.
    pub fn generation(&self) -> Generation {
        Generation::of(self.0.id())
    }

    /// Chip identifier words K0..K3.
    pub fn chip_id(&self) -> [u32; 4] {
        [
            self.0.u32_at(4),
            self.0.u32_at(8),
            self.0.u32_at(12),
            self.0.u32_at(16),
        ]
    }

    /// Bootloader version, absent on short beacons.
    pub fn version(&self) -> Option<String> {
        if self.0.as_bytes().len() < 20 {
            return None;
        }
        Some(self.0.text_at(20, 12))
    }
}

impl PacketView for BeaconAck {
    const NAME: &'static str = "BeaconAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        let declared = self.0.declared_size();
        if !(18..=50).contains(&declared) {
            warn(format!("declared size {declared}, expected range 18..50"));
        }
    }
}

impl fmt::Display for BeaconAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [k0, k1, k2, k3] = self.chip_id();
        write!(
            f,
            "BeaconAck {{ generation={} version={:?} k0=0x{k0:08x} k1=0x{k1:08x} k2=0x{k2:08x} k3=0x{k3:08x} }}",
            self.generation(),
            self.version().unwrap_or_default(),
        )
    }
}

packet_view!(
    /// Firmware version announced to the bootloader before writing.
    FlashVersionReq
);

impl FlashVersionReq {
    /// Longest version `generation` accepts. V2 needs a NUL inside the field.
    pub fn max_version_len(generation: Generation) -> usize {
        match generation {
            Generation::V2 => VERSION_FIELD_LEN - 1,
            Generation::V5 => VERSION_FIELD_LEN,
        }
    }

    /// Check `version` and `key_number` without building a packet.
    pub fn validate(generation: Generation, version: &str, key_number: u8) -> Result<()> {
        version_field(version, Self::max_version_len(generation))?;
        if generation == Generation::V5 && key_number >= KEY_SLOTS {
            return Err(Error::Validation(format!(
                "key number {key_number} out of range 0..{KEY_SLOTS}"
            )));
        }
        Ok(())
    }

    /// Legacy version request.
    pub fn v2(version: &str) -> Result<Self> {
        Self::validate(Generation::V2, version, 0)?;
        let text = version.as_bytes();
        let mut raw = RawPacket::with_layout(id::VERSION_REQ_V2, VERSION_FIELD_LEN);
        raw.put_bytes(4, text);
        Ok(Self(raw))
    }

    /// V5 version request selecting AES key slot `key_number`.
    pub fn v5(version: &str, key_number: u8) -> Result<Self> {
        Self::validate(Generation::V5, version, key_number)?;
        let text = version.as_bytes();
        // 16 version bytes plus the key byte, padded to a 4-byte boundary
        let body = (VERSION_FIELD_LEN + 1).next_multiple_of(4);
        let mut raw = RawPacket::with_layout(id::VERSION_REQ_V5, body);
        raw.put_bytes(4, text);
        raw.put_u8(4 + VERSION_FIELD_LEN, key_number);
        Ok(Self(raw))
    }

    /// Bootloader generation this request targets.
    pub fn generation(&self) -> Generation {
        Generation::of(self.0.id())
    }

    /// Announced firmware version.
    pub fn version(&self) -> String {
        let size = usize::from(self.0.declared_size()).min(VERSION_FIELD_LEN);
        self.0.text_at(4, size)
    }

    /// Selected key slot (V5 only).
    pub fn key_number(&self) -> Option<u8> {
        match self.generation() {
            Generation::V2 => None,
            Generation::V5 => self.0.as_bytes().get(4 + VERSION_FIELD_LEN).copied(),
        }
    }
}

impl PacketView for FlashVersionReq {
    const NAME: &'static str = "FlashVersionReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        let minimum = match self.generation() {
            Generation::V2 => 0x10,
            Generation::V5 => 0x11,
        };
        let declared = self.0.declared_size();
        if declared < minimum {
            warn(format!("declared size {declared}, expected at least {minimum}"));
        }
    }
}

impl fmt::Display for FlashVersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlashVersionReq {{ generation={} version={:?}",
            self.generation(),
            self.version()
        )?;
        if let Some(key) = self.key_number() {
            write!(f, " key_number={key}")?;
        }
        f.write_str(" }")
    }
}

packet_view!(
    /// One flash chunk.
    FlashWriteReq
);

impl FlashWriteReq {
    /// Build a chunk write.
    ///
    /// `data` is the chunk contents (for V5, the full encrypted 0x100-byte
    /// block); `length` is how many of those bytes belong to the image.
    pub fn new(
        generation: Generation,
        sequence_id: u32,
        chunk_number: u16,
        chunk_count: u16,
        data: &[u8],
        length: u16,
    ) -> Result<Self> {
        if data.len() > FLASH_CHUNK_SIZE {
            return Err(Error::Validation(format!(
                "chunk of {} bytes exceeds {FLASH_CHUNK_SIZE:#x}",
                data.len()
            )));
        }
        if generation == Generation::V5 && data.len() != FLASH_CHUNK_SIZE {
            return Err(Error::Validation(format!(
                "V5 chunk must be exactly {FLASH_CHUNK_SIZE:#x} bytes, got {}",
                data.len()
            )));
        }
        if usize::from(length) > FLASH_CHUNK_SIZE {
            return Err(Error::Validation(format!(
                "chunk length {length:#x} exceeds {FLASH_CHUNK_SIZE:#x}"
            )));
        }
        if chunk_count & 0xff00 != 0 {
            return Err(Error::Validation(format!(
                "chunk count {chunk_count:#x} exceeds 0xff"
            )));
        }
        if chunk_number >= chunk_count {
            return Err(Error::Validation(format!(
                "chunk number {chunk_number} out of range 0..{chunk_count}"
            )));
        }

        let mut raw = RawPacket::with_layout(generation.write_req_id(), WRITE_REQ_BODY);
        raw.put_u32(4, sequence_id);
        raw.put_u16(8, chunk_number);
        raw.put_u16(10, chunk_count);
        raw.put_u16(12, length);
        raw.put_bytes(16, data);
        // Erased flash reads 0xff
        raw.0[16 + data.len()..].fill(0xff);
        Ok(Self(raw))
    }

    /// Bootloader generation this request targets.
    pub fn generation(&self) -> Generation {
        Generation::of(self.0.id())
    }

    /// Write session identifier.
    pub fn sequence_id(&self) -> u32 {
        self.0.u32_at(4)
    }

    /// Zero-based chunk index.
    pub fn chunk_number(&self) -> u16 {
        self.0.u16_at(8)
    }

    /// Total chunks in this write.
    pub fn chunk_count(&self) -> u16 {
        self.0.u16_at(10)
    }

    /// Image bytes carried by this chunk.
    pub fn length(&self) -> u16 {
        self.0.u16_at(12)
    }

    /// Reserved word, always zero when built here.
    pub fn padding(&self) -> u16 {
        self.0.u16_at(14)
    }

    /// Whole chunk block as sent (encrypted for V5).
    pub fn block(&self) -> &[u8] {
        self.0.slice(16, FLASH_CHUNK_SIZE)
    }

    /// First `length` bytes of the block.
    pub fn data(&self) -> &[u8] {
        self.0.slice(16, usize::from(self.length()))
    }
}

impl PacketView for FlashWriteReq {
    const NAME: &'static str = "FlashWriteReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        let declared = self.0.declared_size();
        if declared < 12 {
            warn(format!("declared size {declared}, expected at least 12"));
        }
    }
}

impl fmt::Display for FlashWriteReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlashWriteReq {{ generation={} sequence_id=0x{:08x} chunk_number=0x{:04x} chunk_count=0x{:04x} length=0x{:04x} padding=0x{:04x} data={} }}",
            self.generation(),
            self.sequence_id(),
            self.chunk_number(),
            self.chunk_count(),
            self.length(),
            self.padding(),
            hex::encode(self.data())
        )
    }
}

packet_view!(
    /// Bootloader verdict on one chunk.
    FlashWriteAck
);

impl FlashWriteAck {
    /// Build an acknowledgement.
    pub fn new(generation: Generation, sequence_id: u32, chunk_number: u16, result: u16) -> Self {
        let mut raw = RawPacket::with_layout(generation.write_ack_id(), 8);
        raw.put_u32(4, sequence_id);
        raw.put_u16(8, chunk_number);
        raw.put_u16(10, result);
        Self(raw)
    }

    /// Bootloader generation that sent this acknowledgement.
    pub fn generation(&self) -> Generation {
        Generation::of(self.0.id())
    }

    /// Write session identifier echoed by the bootloader.
    pub fn sequence_id(&self) -> u32 {
        self.0.u32_at(4)
    }

    /// Acknowledged chunk.
    pub fn chunk_number(&self) -> u16 {
        self.0.u16_at(8)
    }

    /// Zero on success, a device error code otherwise.
    pub fn result(&self) -> u16 {
        self.0.u16_at(10)
    }
}

impl PacketView for FlashWriteAck {
    const NAME: &'static str = "FlashWriteAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 8, warn);
    }
}

impl fmt::Display for FlashWriteAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlashWriteAck {{ generation={} sequence_id=0x{:08x} chunk_number=0x{:04x} result=0x{:04x} }}",
            self.generation(),
            self.sequence_id(),
            self.chunk_number(),
            self.result()
        )
    }
}
