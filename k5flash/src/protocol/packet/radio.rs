//! Packets understood by the radio firmware (normal running mode).

use std::fmt;

use super::{PacketView, RawPacket, expect_size, id, packet_view};
use crate::error::{Error, Result};

/// Timestamp the stock programming software sends with every request.
pub const DEFAULT_TIMESTAMP: u32 = 0x6457_396a;

/// Largest EEPROM block a single write request can carry.
pub const MAX_EEPROM_WRITE: usize = 0xff - 8;

packet_view!(
    /// Host greeting; starts a firmware-mode session.
    HelloReq
);

impl HelloReq {
    /// Build a greeting carrying `timestamp`.
    pub fn new(timestamp: u32) -> Self {
        let mut raw = RawPacket::with_layout(id::HELLO_REQ, 4);
        raw.put_u32(4, timestamp);
        Self(raw)
    }

    /// Session timestamp.
    pub fn timestamp(&self) -> u32 {
        self.0.u32_at(4)
    }
}

impl PacketView for HelloReq {
    const NAME: &'static str = "HelloReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 4, warn);
    }
}

impl fmt::Display for HelloReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HelloReq {{ timestamp=0x{:08x} }}", self.timestamp())
    }
}

packet_view!(
    /// Firmware reply to [`HelloReq`].
    HelloAck
);

impl HelloAck {
    /// Build a reply as the firmware would send it.
    ///
    /// The version must be ASCII and leave room for its NUL (15 bytes).
    pub fn new(
        version: &str,
        has_custom_aes_key: bool,
        is_password_locked: bool,
        challenge: [u32; 4],
    ) -> Result<Self> {
        if !version.is_ascii() || version.len() > 15 {
            return Err(Error::Validation(format!(
                "firmware version {version:?} must be at most 15 ASCII bytes"
            )));
        }
        let mut raw = RawPacket::with_layout(id::HELLO_ACK, 36);
        raw.put_bytes(4, version.as_bytes());
        raw.put_u8(20, u8::from(has_custom_aes_key));
        raw.put_u8(21, u8::from(is_password_locked));
        for (i, word) in challenge.iter().enumerate() {
            raw.put_u32(24 + i * 4, *word);
        }
        Ok(Self(raw))
    }

    /// Firmware version string.
    pub fn version(&self) -> String {
        self.0.text_at(4, 16)
    }

    /// Whether a custom AES key is programmed.
    pub fn has_custom_aes_key(&self) -> bool {
        self.0.u8_at(20) != 0
    }

    /// Whether the radio is password locked.
    pub fn is_password_locked(&self) -> bool {
        self.0.u8_at(21) != 0
    }

    /// Authentication challenge words.
    pub fn challenge(&self) -> [u32; 4] {
        [
            self.0.u32_at(24),
            self.0.u32_at(28),
            self.0.u32_at(32),
            self.0.u32_at(36),
        ]
    }
}

impl PacketView for HelloAck {
    const NAME: &'static str = "HelloAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 36, warn);
    }
}

impl fmt::Display for HelloAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [c0, c1, c2, c3] = self.challenge();
        write!(
            f,
            "HelloAck {{ version={:?} has_custom_aes_key={} is_password_locked={} challenge={c0:08x}{c1:08x}{c2:08x}{c3:08x} }}",
            self.version(),
            self.has_custom_aes_key(),
            self.is_password_locked(),
        )
    }
}

packet_view!(
    /// Test-mode greeting.
    HelloTestReq
);

impl HelloTestReq {
    /// Build a test-mode greeting.
    pub fn new(timestamp: u32) -> Self {
        let mut raw = RawPacket::with_layout(id::HELLO_TEST_REQ, 4);
        raw.put_u32(4, timestamp);
        Self(raw)
    }

    /// Session timestamp.
    pub fn timestamp(&self) -> u32 {
        self.0.u32_at(4)
    }
}

impl Default for HelloTestReq {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP)
    }
}

impl PacketView for HelloTestReq {
    const NAME: &'static str = "HelloTestReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 4, warn);
    }
}

impl fmt::Display for HelloTestReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HelloTestReq {{ timestamp=0x{:08x} }}", self.timestamp())
    }
}

packet_view!(
    /// Read one EEPROM block.
    ReadEepromReq
);

impl ReadEepromReq {
    /// Build a read of `size` bytes at `offset`.
    pub fn new(offset: u16, size: u8, timestamp: u32) -> Self {
        let mut raw = RawPacket::with_layout(id::READ_EEPROM_REQ, 8);
        raw.put_u16(4, offset);
        raw.put_u8(6, size);
        raw.put_u32(8, timestamp);
        Self(raw)
    }

    /// EEPROM offset.
    pub fn offset(&self) -> u16 {
        self.0.u16_at(4)
    }

    /// Requested byte count.
    pub fn size(&self) -> u8 {
        self.0.u8_at(6)
    }

    /// Session timestamp.
    pub fn timestamp(&self) -> u32 {
        self.0.u32_at(8)
    }
}

impl PacketView for ReadEepromReq {
    const NAME: &'static str = "ReadEepromReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 8, warn);
    }
}

impl fmt::Display for ReadEepromReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadEepromReq {{ offset=0x{:04x} size=0x{:02x} timestamp=0x{:08x} }}",
            self.offset(),
            self.size(),
            self.timestamp()
        )
    }
}

packet_view!(
    /// EEPROM block returned by the radio.
    ReadEepromAck
);

impl ReadEepromAck {
    /// Build a reply carrying `data` read at `offset`.
    pub fn new(offset: u16, data: &[u8]) -> Result<Self> {
        let size = u8::try_from(data.len())
            .map_err(|_| Error::Validation(format!("EEPROM block of {} bytes", data.len())))?;
        let mut raw = RawPacket::with_layout(id::READ_EEPROM_ACK, 4 + data.len());
        raw.put_u16(4, offset);
        raw.put_u8(6, size);
        raw.put_bytes(8, data);
        Ok(Self(raw))
    }

    /// EEPROM offset echoed by the radio.
    pub fn offset(&self) -> u16 {
        self.0.u16_at(4)
    }

    /// Data byte count.
    pub fn size(&self) -> u8 {
        self.0.u8_at(6)
    }

    /// Block contents, clamped to what the buffer carries.
    pub fn data(&self) -> &[u8] {
        self.0.slice(8, usize::from(self.size()))
    }
}

impl PacketView for ReadEepromAck {
    const NAME: &'static str = "ReadEepromAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        let declared = self.0.declared_size();
        if declared < 8 {
            warn(format!("declared size {declared}, expected at least 8"));
        }
        let expected = u16::from(self.size()) + 4;
        if declared != expected {
            warn(format!(
                "declared size {declared} disagrees with data size {}",
                self.size()
            ));
        }
    }
}

impl fmt::Display for ReadEepromAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadEepromAck {{ offset=0x{:04x} size=0x{:02x} data={} }}",
            self.offset(),
            self.size(),
            hex::encode(self.data())
        )
    }
}

packet_view!(
    /// Write one EEPROM block.
    WriteEepromReq
);

impl WriteEepromReq {
    /// Build a write of `data` at `offset`.
    ///
    /// Fails when `data` exceeds [`MAX_EEPROM_WRITE`] bytes.
    pub fn new(offset: u16, data: &[u8], allow_password: bool, timestamp: u32) -> Result<Self> {
        if data.len() > MAX_EEPROM_WRITE {
            return Err(Error::Validation(format!(
                "EEPROM write of {} bytes exceeds {MAX_EEPROM_WRITE}",
                data.len()
            )));
        }
        let mut raw = RawPacket::with_layout(id::WRITE_EEPROM_REQ, 8 + data.len());
        raw.put_u16(4, offset);
        raw.put_u8(6, u8::try_from(data.len()).unwrap_or(u8::MAX));
        raw.put_u8(7, u8::from(allow_password));
        raw.put_u32(8, timestamp);
        raw.put_bytes(12, data);
        Ok(Self(raw))
    }

    /// EEPROM offset.
    pub fn offset(&self) -> u16 {
        self.0.u16_at(4)
    }

    /// Data byte count.
    pub fn size(&self) -> u8 {
        self.0.u8_at(6)
    }

    /// Whether the write may touch the password area.
    pub fn allow_password(&self) -> bool {
        self.0.u8_at(7) != 0
    }

    /// Session timestamp.
    pub fn timestamp(&self) -> u32 {
        self.0.u32_at(8)
    }

    /// Block contents.
    pub fn data(&self) -> &[u8] {
        self.0.slice(12, usize::from(self.size()))
    }
}

impl PacketView for WriteEepromReq {
    const NAME: &'static str = "WriteEepromReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        let declared = self.0.declared_size();
        if declared < 8 {
            warn(format!("declared size {declared}, expected at least 8"));
        }
    }
}

impl fmt::Display for WriteEepromReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WriteEepromReq {{ offset=0x{:04x} size=0x{:02x} allow_password={} timestamp=0x{:08x} data={} }}",
            self.offset(),
            self.size(),
            self.allow_password(),
            self.timestamp(),
            hex::encode(self.data())
        )
    }
}

packet_view!(
    /// Radio confirmation of an EEPROM write.
    WriteEepromAck
);

impl WriteEepromAck {
    /// Build a confirmation for `offset`.
    pub fn new(offset: u16) -> Self {
        let mut raw = RawPacket::with_layout(id::WRITE_EEPROM_ACK, 2);
        raw.put_u16(4, offset);
        Self(raw)
    }

    /// Offset that was written.
    pub fn offset(&self) -> u16 {
        self.0.u16_at(4)
    }
}

impl PacketView for WriteEepromAck {
    const NAME: &'static str = "WriteEepromAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 2, warn);
    }
}

impl fmt::Display for WriteEepromAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteEepromAck {{ offset=0x{:04x} }}", self.offset())
    }
}

packet_view!(
    /// RSSI query.
    ReadRssiReq
);

impl ReadRssiReq {
    /// Build the query.
    pub fn new() -> Self {
        Self(RawPacket::with_layout(id::READ_RSSI_REQ, 0))
    }
}

impl Default for ReadRssiReq {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketView for ReadRssiReq {
    const NAME: &'static str = "ReadRssiReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }
}

impl fmt::Display for ReadRssiReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadRssiReq {}")
    }
}

packet_view!(
    /// Receiver signal report.
    ReadRssiAck
);

impl ReadRssiAck {
    /// Build a report.
    pub fn new(rssi: u16, ex_noise_indicator: u8, glitch_indicator: u8) -> Self {
        let mut raw = RawPacket::with_layout(id::READ_RSSI_ACK, 4);
        raw.put_u16(4, rssi);
        raw.put_u8(6, ex_noise_indicator);
        raw.put_u8(7, glitch_indicator);
        Self(raw)
    }

    /// Raw RSSI reading.
    pub fn rssi(&self) -> u16 {
        self.0.u16_at(4)
    }

    /// Excess noise indicator.
    pub fn ex_noise_indicator(&self) -> u8 {
        self.0.u8_at(6)
    }

    /// Glitch indicator.
    pub fn glitch_indicator(&self) -> u8 {
        self.0.u8_at(7)
    }
}

impl PacketView for ReadRssiAck {
    const NAME: &'static str = "ReadRssiAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 4, warn);
    }
}

impl fmt::Display for ReadRssiAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadRssiAck {{ rssi=0x{:04x} ex_noise_indicator=0x{:02x} glitch_indicator=0x{:02x} }}",
            self.rssi(),
            self.ex_noise_indicator(),
            self.glitch_indicator()
        )
    }
}

packet_view!(
    /// Battery ADC query.
    ReadAdcReq
);

impl ReadAdcReq {
    /// Build the query.
    pub fn new() -> Self {
        Self(RawPacket::with_layout(id::READ_ADC_REQ, 0))
    }
}

impl Default for ReadAdcReq {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketView for ReadAdcReq {
    const NAME: &'static str = "ReadAdcReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 0, warn);
    }
}

impl fmt::Display for ReadAdcReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadAdcReq {}")
    }
}

packet_view!(
    /// Battery voltage and current readings.
    ReadAdcAck
);

impl ReadAdcAck {
    /// Build a report.
    pub fn new(voltage: u16, current: u16) -> Self {
        let mut raw = RawPacket::with_layout(id::READ_ADC_ACK, 4);
        raw.put_u16(4, voltage);
        raw.put_u16(6, current);
        Self(raw)
    }

    /// Raw voltage ADC value.
    pub fn voltage(&self) -> u16 {
        self.0.u16_at(4)
    }

    /// Raw current ADC value.
    pub fn current(&self) -> u16 {
        self.0.u16_at(6)
    }
}

impl PacketView for ReadAdcAck {
    const NAME: &'static str = "ReadAdcAck";

    fn raw(&self) -> &RawPacket {
        &self.0
    }

    fn check(&self, warn: &mut dyn FnMut(String)) {
        expect_size(&self.0, 4, warn);
    }
}

impl fmt::Display for ReadAdcAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadAdcAck {{ voltage=0x{:04x} current=0x{:04x} }}",
            self.voltage(),
            self.current()
        )
    }
}

packet_view!(
    /// Ask the firmware to restart into the bootloader.
    RebootReq
);

impl RebootReq {
    /// Build the request.
    pub fn new() -> Self {
        Self(RawPacket::with_layout(id::REBOOT_REQ, 0))
    }
}

impl Default for RebootReq {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketView for RebootReq {
    const NAME: &'static str = "RebootReq";

    fn raw(&self) -> &RawPacket {
        &self.0
    }
}

impl fmt::Display for RebootReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RebootReq {}")
    }
}
