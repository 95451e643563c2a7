//! Radio-side bootloader emulator.
//!
//! Plays the device end of a flash write: announces itself with beacons until
//! the host speaks, records the negotiated version, acknowledges every chunk
//! and reassembles the image. V5 chunks are decrypted with the key slot named
//! in the version request.

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::port::Port;
use crate::protocol::cipher::FlashCipher;
use crate::protocol::link::PacketLink;
use crate::protocol::packet::{
    BeaconAck, FLASH_CHUNK_SIZE, FlashVersionReq, FlashWriteAck, FlashWriteReq, Generation, Packet,
    VERSION_FIELD_LEN,
};

/// Host version with anything but printable ASCII replaced by `?`.
fn printable_version(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .take(VERSION_FIELD_LEN)
        .collect()
}

/// Something the emulated bootloader went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorEvent {
    /// The host announced a firmware version.
    Version(String),
    /// A chunk was received and acknowledged.
    Chunk {
        /// Zero-based chunk number.
        number: u16,
        /// Total chunks announced by the host.
        count: u16,
        /// Image bytes carried by the chunk.
        length: u16,
        /// Result code sent back.
        result: u16,
    },
    /// The last chunk arrived; the reassembled image.
    Image(FirmwareImage),
}

/// Emulated bootloader on one link.
pub struct Emulator<P: Port> {
    link: PacketLink<P>,
    beacon: BeaconAck,
    muted: bool,
    version: String,
    decryptor: Option<FlashCipher>,
    image: Option<Vec<u8>>,
    rejected: Option<(u16, u16)>,
}

impl<P: Port> Emulator<P> {
    /// Emulate a bootloader that announces itself with `beacon`.
    pub fn new(link: PacketLink<P>, beacon: BeaconAck) -> Self {
        Self {
            link,
            beacon,
            muted: false,
            version: String::new(),
            decryptor: None,
            image: None,
            rejected: None,
        }
    }

    /// Open a link on `port` and emulate a stock bootloader of `generation`.
    pub fn open(port: P, generation: Generation) -> Result<Self> {
        Ok(Self::new(PacketLink::open(port)?, BeaconAck::captured(generation)))
    }

    /// Answer `chunk` with result `code` instead of accepting it.
    #[must_use]
    pub fn with_rejected_chunk(mut self, chunk: u16, code: u16) -> Self {
        self.rejected = Some((chunk, code));
        self
    }

    /// Get a reference to the underlying link.
    pub fn link(&self) -> &PacketLink<P> {
        &self.link
    }

    /// Consume the emulator and return the underlying link.
    pub fn into_link(self) -> PacketLink<P> {
        self.link
    }

    /// Beacon (unless muted), then handle at most one packet from the host.
    ///
    /// A receive timeout is not an error here; it yields `None`.
    pub fn step(&mut self) -> Result<Option<EmulatorEvent>> {
        if !self.muted {
            self.link.send(self.beacon.clone())?;
        }
        let packet = match self.link.recv() {
            Ok(packet) => packet,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(e),
        };

        match packet {
            // The next beacon doubles as the reply.
            Packet::FlashVersionReq(req) => self.on_version(&req).map(Some),
            Packet::FlashWriteReq(req) => {
                let event = self.on_write(&req)?;
                self.muted = true;
                Ok(Some(event))
            },
            other => {
                debug!("Ignoring {other}");
                self.muted = true;
                Ok(None)
            },
        }
    }

    /// Run until `stop` returns `true`, handing every event to `on_event`.
    ///
    /// Garbled frames are logged and skipped.
    pub fn run<S, F>(&mut self, stop: S, mut on_event: F) -> Result<()>
    where
        S: Fn() -> bool,
        F: FnMut(&EmulatorEvent),
    {
        while !stop() {
            match self.step() {
                Ok(Some(event)) => on_event(&event),
                Ok(None) => {},
                Err(Error::Framing(message)) => warn!("{message}"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn on_version(&mut self, req: &FlashVersionReq) -> Result<EmulatorEvent> {
        self.version = printable_version(&req.version());
        self.image = None;
        self.decryptor = match req.generation() {
            Generation::V2 => None,
            Generation::V5 => Some(FlashCipher::decryptor(req.key_number().unwrap_or(0))?),
        };
        info!("Host announced firmware {:?}", self.version);
        Ok(EmulatorEvent::Version(self.version.clone()))
    }

    fn on_write(&mut self, req: &FlashWriteReq) -> Result<EmulatorEvent> {
        let number = req.chunk_number();
        let count = req.chunk_count();
        debug!(
            "Chunk 0x{number:04x}/0x{count:04x} length=0x{:04x}",
            req.length()
        );

        if let Some((chunk, code)) = self.rejected {
            if chunk == number {
                self.link
                    .send(FlashWriteAck::new(req.generation(), req.sequence_id(), number, code))?;
                return Ok(EmulatorEvent::Chunk {
                    number,
                    count,
                    length: req.length(),
                    result: code,
                });
            }
        }

        let size = usize::from(count) * FLASH_CHUNK_SIZE;
        let image = self.image.get_or_insert_with(|| {
            if number != 0 {
                warn!("Write started at chunk 0x{number:04x}");
            }
            vec![0xff; size]
        });
        if image.len() != size {
            warn!(
                "Chunk count changed 0x{:04x} => 0x{count:04x}",
                image.len() / FLASH_CHUNK_SIZE
            );
        }
        let at = usize::from(number) * FLASH_CHUNK_SIZE;
        if image.len() < size.max(at + FLASH_CHUNK_SIZE) {
            image.resize(size.max(at + FLASH_CHUNK_SIZE), 0xff);
        }

        let mut block = req.block().to_vec();
        if let Some(decryptor) = self.decryptor.as_mut() {
            decryptor.apply(&mut block)?;
        }
        image[at..at + FLASH_CHUNK_SIZE].copy_from_slice(&block);

        self.link
            .send(FlashWriteAck::new(req.generation(), req.sequence_id(), number, 0))?;

        let event = if number.checked_add(1) == Some(count) {
            let mut data = self.image.take().unwrap_or_default();
            let shrink = FLASH_CHUNK_SIZE.saturating_sub(usize::from(req.length()));
            data.truncate(data.len().saturating_sub(shrink));
            let image = FirmwareImage::new(data, self.version.clone())?;
            info!("Received {image}");
            EmulatorEvent::Image(image)
        } else {
            EmulatorEvent::Chunk {
                number,
                count,
                length: req.length(),
                result: 0,
            }
        };
        Ok(event)
    }
}
