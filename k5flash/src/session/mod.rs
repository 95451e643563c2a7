//! Protocol sessions with a radio.
//!
//! A [`Session`] owns the packet link and tracks where the conversation is:
//!
//! ```text
//!                  handshake() / wait_for_beacon()
//!  AwaitingBeacon ---------------------------------> Ready <------------+
//!                                                      |                |
//!                     read_eeprom / write_eeprom /     |   done or      |
//!                     write_flash                      v   rejected     |
//!                                  EepromRead | EepromWrite | FlashWrite
//!
//!  any state --(transport error or close())--> Closed
//! ```
//!
//! Firmware mode (hello, ADC, RSSI, EEPROM, reboot) only has one protocol
//! shape. In bootloader mode the first beacon decides between the V2 and V5
//! shapes; see [`ProtocolVariant`].

mod eeprom;
mod firmware;
mod flash;
pub mod ids;
pub mod report;

use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::chunker::Block;
use crate::protocol::cipher::FlashCipher;
use crate::protocol::link::PacketLink;
use crate::protocol::packet::{
    BeaconAck, DEFAULT_TIMESTAMP, DEFAULT_V2_VERSION, DEFAULT_V5_VERSION, FlashVersionReq,
    Generation, Packet,
};

pub use firmware::HelloInfo;
pub use flash::{MAX_ABSORBED_BEACONS, flash_usage};
pub use ids::{RandomIds, SequenceIdSource};
pub use report::{Event, NullReporter, Reporter};

/// Pause between the reboot request and reading the bootloader banner.
pub const REBOOT_SETTLE: Duration = Duration::from_secs(1);

/// Protocol shape in use, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// Firmware mode or a legacy bootloader: plain chunks.
    V2,
    /// V5 bootloader: chunks encrypted with the selected key slot.
    V5 {
        /// Key slot announced in the version request.
        key_number: u8,
    },
}

impl ProtocolVariant {
    /// Packet generation for this variant.
    pub fn generation(self) -> Generation {
        match self {
            Self::V2 => Generation::V2,
            Self::V5 { .. } => Generation::V5,
        }
    }

    /// Version request announcing `version` (or the stock default).
    pub fn version_request(self, version: Option<&str>) -> Result<FlashVersionReq> {
        match self {
            Self::V2 => FlashVersionReq::v2(version.unwrap_or(DEFAULT_V2_VERSION)),
            Self::V5 { key_number } => {
                FlashVersionReq::v5(version.unwrap_or(DEFAULT_V5_VERSION), key_number)
            },
        }
    }

    /// Chunk encryptor for one flash write, if this variant encrypts.
    pub fn encryptor(self) -> Result<Option<FlashCipher>> {
        match self {
            Self::V2 => Ok(None),
            Self::V5 { key_number } => FlashCipher::encryptor(key_number).map(Some),
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2 => f.write_str("V2"),
            Self::V5 { key_number } => write!(f, "V5 (key {key_number})"),
        }
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing negotiated yet.
    AwaitingBeacon,
    /// Idle and ready for the next operation.
    Ready,
    /// EEPROM read in progress.
    EepromRead,
    /// EEPROM write in progress.
    EepromWrite,
    /// Flash write in progress.
    FlashWrite,
    /// Closed explicitly or after a transport error.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingBeacon => "awaiting beacon",
            Self::Ready => "ready",
            Self::EepromRead => "reading EEPROM",
            Self::EepromWrite => "writing EEPROM",
            Self::FlashWrite => "writing flash",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Device-specific write limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Lowest flash address a write may start at.
    pub min_flash_addr: usize,
    /// Last writable flash address (inclusive).
    pub max_flash_addr: usize,
    /// Largest raw image accepted.
    pub max_image_size: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_flash_addr: 0x0000,
            max_flash_addr: 0xebff,
            max_image_size: 0x10000,
        }
    }
}

impl DeviceLimits {
    /// Set the last writable flash address.
    #[must_use]
    pub fn with_max_flash_addr(mut self, addr: usize) -> Self {
        self.max_flash_addr = addr;
        self
    }
}

/// A conversation with one radio over one link.
pub struct Session<P: Port> {
    link: PacketLink<P>,
    state: SessionState,
    variant: ProtocolVariant,
    key_number: u8,
    limits: DeviceLimits,
    timestamp: u32,
    reboot_settle: Duration,
    reporter: Box<dyn Reporter>,
    ids: Box<dyn SequenceIdSource>,
}

impl<P: Port> Session<P> {
    /// Start a session over an existing link.
    pub fn new(link: PacketLink<P>) -> Self {
        Self {
            link,
            state: SessionState::AwaitingBeacon,
            variant: ProtocolVariant::V2,
            key_number: 0,
            limits: DeviceLimits::default(),
            timestamp: DEFAULT_TIMESTAMP,
            reboot_settle: REBOOT_SETTLE,
            reporter: Box::new(NullReporter),
            ids: Box::new(RandomIds),
        }
    }

    /// Open a link on `port` and start a session on it.
    pub fn open(port: P) -> Result<Self> {
        Ok(Self::new(PacketLink::open(port)?))
    }

    /// Key slot to request if the bootloader turns out to be V5.
    #[must_use]
    pub fn with_key_number(mut self, key_number: u8) -> Self {
        self.key_number = key_number;
        self
    }

    /// Override the device limits.
    #[must_use]
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Timestamp sent with firmware-mode requests.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Pause between reboot and reading the bootloader banner.
    #[must_use]
    pub fn with_reboot_settle(mut self, delay: Duration) -> Self {
        self.reboot_settle = delay;
        self
    }

    /// Route progress events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Draw flash sequence ids from `ids`.
    #[must_use]
    pub fn with_id_source(mut self, ids: impl SequenceIdSource + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated protocol variant.
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Device limits in force.
    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    /// Get a reference to the underlying link.
    pub fn link(&self) -> &PacketLink<P> {
        &self.link
    }

    /// Consume the session and return the underlying link.
    pub fn into_link(self) -> PacketLink<P> {
        self.link
    }

    /// Close the session and the port beneath it.
    pub fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        self.link.port_mut().close()
    }

    /// Block until the bootloader announces itself and select the variant.
    ///
    /// Anything other than a beacon is fatal here.
    pub fn wait_for_beacon(&mut self) -> Result<BeaconAck> {
        self.ensure_open()?;
        self.status("Waiting for bootloader beacon...");
        let received = self.link.recv();
        let beacon = match self.settle(received)? {
            Packet::BeaconAck(beacon) => beacon,
            other => return Err(unexpected(&other)),
        };

        self.variant = match beacon.generation() {
            Generation::V2 => ProtocolVariant::V2,
            Generation::V5 => ProtocolVariant::V5 {
                key_number: self.key_number,
            },
        };
        self.state = SessionState::Ready;
        let version = beacon.version().unwrap_or_default();
        info!("Bootloader {version:?}, protocol {}", self.variant);
        self.status(&format!("   Bootloader: \"{version}\""));
        Ok(beacon)
    }

    fn status(&mut self, message: &str) {
        self.reporter.report(&Event::Status(message.to_string()));
    }

    fn block_started(&mut self, block: Block, count: usize) {
        debug!(
            "Block {}/{count} at {:#06x}+{:#x}",
            block.index + 1,
            block.address,
            block.len
        );
        self.reporter.report(&Event::BlockStarted {
            index: block.index,
            count,
            address: block.address,
            len: block.len,
        });
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Enter `next` from `Ready`.
    fn begin(&mut self, next: SessionState) -> Result<()> {
        self.ensure_open()?;
        if self.state != SessionState::Ready {
            return Err(Error::Unsupported(format!(
                "cannot start {next} while {}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Leave an operation: transport failures close the session, anything
    /// else returns it to `Ready`.
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.state = match &result {
            Err(e) if e.is_transport() => SessionState::Closed,
            _ => SessionState::Ready,
        };
        result
    }

    /// Close the session if `result` is a transport failure.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_transport() {
                debug!("Transport failure, closing session: {e}");
                self.state = SessionState::Closed;
            }
        }
        result
    }

    /// Send one request and return the next packet, in `Ready` state.
    fn exchange(&mut self, request: impl Into<Packet>) -> Result<Packet> {
        self.ensure_open()?;
        if self.state != SessionState::Ready {
            return Err(Error::Unsupported(format!(
                "request needs a ready session, state is {}",
                self.state
            )));
        }
        let result = self.link.send(request).and_then(|()| self.link.recv());
        self.settle(result)
    }
}

fn unexpected(packet: &Packet) -> Error {
    Error::UnexpectedResponse(packet.to_string())
}

fn narrow<T: TryFrom<usize>>(value: usize, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| Error::Validation(format!("{what} {value:#x} does not fit")))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::packet::{HelloAck, ReadAdcAck};

    #[test]
    fn test_v2_beacon_selects_v2() {
        let mut session = session_with(vec![BeaconAck::captured(Generation::V2).into()]);
        let beacon = session.wait_for_beacon().unwrap();
        assert_eq!(beacon.version().as_deref(), Some("2.00.06"));
        assert_eq!(session.variant(), ProtocolVariant::V2);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_v5_beacon_selects_v5_with_key() {
        let mut session =
            session_with(vec![BeaconAck::captured(Generation::V5).into()]).with_key_number(3);
        session.wait_for_beacon().unwrap();
        assert_eq!(session.variant(), ProtocolVariant::V5 { key_number: 3 });
    }

    #[test]
    fn test_non_beacon_is_fatal_while_waiting() {
        let mut session = session_with(vec![HelloAck::new("2.01.26", false, false, [0; 4])
            .unwrap()
            .into()]);
        let err = session.wait_for_beacon().unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(ref s) if s.starts_with("HelloAck")));
        assert_eq!(session.state(), SessionState::AwaitingBeacon);
    }

    #[test]
    fn test_timeout_closes_session() {
        let mut session = Session::open(MockPort::default()).unwrap();
        assert!(session.wait_for_beacon().unwrap_err().is_timeout());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.wait_for_beacon(), Err(Error::SessionClosed)));
    }

    #[test]
    fn test_requests_need_ready_session() {
        let mut session = session_with(vec![ReadAdcAck::new(1, 2).into()]);
        assert!(matches!(session.read_adc(), Err(Error::Unsupported(_))));
        assert!(matches!(session.read_eeprom(0, 0x10), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_variant_version_requests() {
        let req = ProtocolVariant::V2.version_request(None).unwrap();
        assert_eq!(req.version(), DEFAULT_V2_VERSION);
        let req = ProtocolVariant::V5 { key_number: 2 }
            .version_request(Some("5.00.07"))
            .unwrap();
        assert_eq!(req.key_number(), Some(2));
        assert!(ProtocolVariant::V5 { key_number: 16 }.version_request(None).is_err());
        assert!(ProtocolVariant::V2.encryptor().unwrap().is_none());
        assert!(ProtocolVariant::V5 { key_number: 0 }.encryptor().unwrap().is_some());
    }

    #[test]
    fn test_close() {
        let mut session = Session::open(MockPort::default()).unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.handshake(), Err(Error::SessionClosed)));
    }
}
