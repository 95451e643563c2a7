//! Passive packet monitor.
//!
//! Decodes every frame seen on a line without ever transmitting. Useful with
//! a tap on the radio's programming cable.

use log::debug;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::link::PacketLink;
use crate::protocol::packet::Packet;

/// Listen-only packet reader.
pub struct Monitor<P: Port> {
    link: PacketLink<P>,
}

impl<P: Port> Monitor<P> {
    /// Monitor an existing link.
    pub fn new(link: PacketLink<P>) -> Self {
        Self { link }
    }

    /// Open a link on `port` and monitor it.
    pub fn open(port: P) -> Result<Self> {
        Ok(Self::new(PacketLink::open(port)?))
    }

    /// Get a reference to the underlying link.
    pub fn link(&self) -> &PacketLink<P> {
        &self.link
    }

    /// Next packet, or `None` if the line stayed quiet for one read timeout.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        match self.link.recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Decode packets until `stop` returns `true`.
    ///
    /// Errors go to `on_error` and the loop keeps listening.
    pub fn run<S, F, E>(&mut self, stop: S, mut on_packet: F, mut on_error: E)
    where
        S: Fn() -> bool,
        F: FnMut(&Packet),
        E: FnMut(&Error),
    {
        while !stop() {
            match self.next_packet() {
                Ok(Some(packet)) => on_packet(&packet),
                Ok(None) => {},
                Err(e) => {
                    debug!("Monitor error: {e}");
                    on_error(&e);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::envelope;
    use crate::protocol::packet::{ReadAdcAck, ReadRssiReq};

    fn framed(packet: impl Into<Packet>) -> Vec<u8> {
        envelope::encode(packet.into().as_bytes()).unwrap()
    }

    #[test]
    fn test_monitor_reports_packets_and_errors() {
        let link = PacketLink::open(MockPort::default())
            .unwrap()
            .with_resync_delay(Duration::ZERO);
        let mut monitor = Monitor::new(link);
        let port = monitor.link.port_mut();
        port.push(&framed(ReadRssiReq::new()));
        port.push(&[0x00, 0x01, 0x02, 0x03]);

        let mut packets = Vec::new();
        let mut errors = Vec::new();
        let rounds = Cell::new(0);
        monitor.run(
            || {
                rounds.set(rounds.get() + 1);
                rounds.get() > 3
            },
            |packet| packets.push(packet.to_string()),
            |err| errors.push(err.to_string()),
        );

        assert_eq!(packets, vec!["ReadRssiReq {}".to_string()]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("00010203"));
    }

    #[test]
    fn test_quiet_line_is_not_an_error() {
        let mut monitor = Monitor::open(MockPort::default()).unwrap();
        assert!(monitor.next_packet().unwrap().is_none());
        monitor.link.port_mut().push(&framed(ReadAdcAck::new(1, 2)));
        assert!(matches!(monitor.next_packet().unwrap(), Some(Packet::ReadAdcAck(_))));
    }
}
