//! Packet exchange over a [`Port`].

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::envelope;
use crate::protocol::packet::Packet;

/// Pause before draining the line after a bad frame header.
pub const RESYNC_DELAY: Duration = Duration::from_secs(1);

/// Envelope-framed packet channel.
pub struct PacketLink<P: Port> {
    port: P,
    resync_delay: Duration,
}

impl<P: Port> PacketLink<P> {
    /// Wrap an open port, discarding anything already waiting on it.
    pub fn open(port: P) -> Result<Self> {
        let mut link = Self {
            port,
            resync_delay: RESYNC_DELAY,
        };
        let stale = link.read_raw_buffer()?;
        if !stale.is_empty() {
            trace!("Discarded {} stale bytes: {}", stale.len(), hex::encode(&stale));
        }
        Ok(link)
    }

    /// Override the pause taken after a bad frame header.
    #[must_use]
    pub fn with_resync_delay(mut self, delay: Duration) -> Self {
        self.resync_delay = delay;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the link and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Frame and transmit one packet.
    pub fn send(&mut self, packet: impl Into<Packet>) -> Result<()> {
        let packet = packet.into();
        debug!("Send {packet}");
        let frame = envelope::encode(packet.as_bytes())?;
        trace!("TX {}", hex::encode(&frame));
        self.port.write_all_bytes(&frame)
    }

    /// Receive and decode the next packet.
    ///
    /// Shape warnings are logged and otherwise ignored.
    pub fn recv(&mut self) -> Result<Packet> {
        let mut frame = self.port.read_exact_bytes(4)?;
        if frame[..2] != envelope::HEADER {
            thread::sleep(self.resync_delay);
            let tail = self.read_raw_buffer()?;
            frame.extend_from_slice(&tail);
            return Err(Error::Framing(format!(
                "bad frame header, discarded [{}]",
                hex::encode(&frame)
            )));
        }

        let size = envelope::declared_size(&frame).unwrap_or_default();
        let rest = self.port.read_exact_bytes(size + 4)?;
        frame.extend_from_slice(&rest);
        trace!("RX {}", hex::encode(&frame));

        let payload = envelope::decode(&frame)?;
        let decoded = Packet::decode(&payload)?;
        for warning in &decoded.warnings {
            warn!("{warning}");
        }
        debug!("Recv {}", decoded.packet);
        Ok(decoded.packet)
    }

    /// Read whatever bytes are currently waiting, without framing.
    pub fn read_raw_buffer(&mut self) -> Result<Vec<u8>> {
        let available = self.port.bytes_available()?;
        if available == 0 {
            return Ok(Vec::new());
        }
        self.port.read_exact_bytes(available)
    }
}
