//! Firmware-mode requests: greeting, sensors and reboot.

use std::thread;

use log::{info, trace};

use super::{ProtocolVariant, Session, SessionState, unexpected};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::packet::{
    HelloAck, HelloReq, Packet, ReadAdcAck, ReadAdcReq, ReadRssiAck, ReadRssiReq, RebootReq,
};

/// Longest bootloader banner read after a reboot.
const BANNER_LEN: usize = 16;

/// What the firmware reports when greeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloInfo {
    /// Firmware version string.
    pub firmware_version: String,
    /// Whether a custom AES key is programmed.
    pub has_custom_aes_key: bool,
    /// Whether the radio is password locked.
    pub is_password_locked: bool,
    /// Authentication challenge words.
    pub challenge: [u32; 4],
}

impl From<&HelloAck> for HelloInfo {
    fn from(ack: &HelloAck) -> Self {
        Self {
            firmware_version: ack.version(),
            has_custom_aes_key: ack.has_custom_aes_key(),
            is_password_locked: ack.is_password_locked(),
            challenge: ack.challenge(),
        }
    }
}

impl<P: Port> Session<P> {
    /// Greet the running firmware.
    ///
    /// Leaves the session `Ready` in firmware mode.
    pub fn handshake(&mut self) -> Result<HelloInfo> {
        self.ensure_open()?;
        self.status("Handshake...");
        let result = self
            .link
            .send(HelloReq::new(self.timestamp))
            .and_then(|()| self.link.recv());
        let ack = match self.settle(result)? {
            Packet::HelloAck(ack) => ack,
            other => return Err(unexpected(&other)),
        };

        let info = HelloInfo::from(&ack);
        info!("Firmware {:?}", info.firmware_version);
        self.variant = ProtocolVariant::V2;
        self.state = SessionState::Ready;
        Ok(info)
    }

    /// Read the battery ADC.
    pub fn read_adc(&mut self) -> Result<ReadAdcAck> {
        self.status("Read ADC...");
        match self.exchange(ReadAdcReq::new())? {
            Packet::ReadAdcAck(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    /// Read the receiver signal indicators.
    pub fn read_rssi(&mut self) -> Result<ReadRssiAck> {
        self.status("Read RSSI...");
        match self.exchange(ReadRssiReq::new())? {
            Packet::ReadRssiAck(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    /// Restart the radio into its bootloader and return the banner version.
    ///
    /// The session expects a beacon afterwards.
    pub fn reboot(&mut self) -> Result<String> {
        self.ensure_open()?;
        if self.state != SessionState::Ready {
            return Err(Error::Unsupported(format!(
                "reboot needs a ready session, state is {}",
                self.state
            )));
        }
        self.status("Reboot device...");
        let sent = self.link.send(RebootReq::new());
        self.settle(sent)?;

        thread::sleep(self.reboot_settle);
        let raw = self.link.read_raw_buffer();
        let banner = self.settle(raw)?;
        trace!("Reboot banner: {}", hex::encode(&banner));

        let head = &banner[..banner.len().min(BANNER_LEN)];
        if head.is_empty() {
            return Err(Error::UnexpectedResponse(
                "missing bootloader message after reboot".into(),
            ));
        }
        let end = head.iter().position(|&b| b == 0).unwrap_or(head.len());
        let version = String::from_utf8_lossy(&head[..end]).into_owned();

        self.state = SessionState::AwaitingBeacon;
        self.status(&format!("   Bootloader: \"{version}\""));
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testing::*;
    use super::*;
    use crate::protocol::packet::BeaconAck;
    use crate::protocol::packet::Generation;

    fn hello() -> Packet {
        HelloAck::new("2.01.26", false, true, [9, 8, 7, 6])
            .unwrap()
            .into()
    }

    #[test]
    fn test_handshake_reports_firmware() {
        let mut session = session_with(vec![hello()]);
        let info = session.handshake().unwrap();
        assert_eq!(info.firmware_version, "2.01.26");
        assert!(!info.has_custom_aes_key);
        assert!(info.is_password_locked);
        assert_eq!(info.challenge, [9, 8, 7, 6]);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(matches!(sent(&session)[0], Packet::HelloReq(_)));
    }

    #[test]
    fn test_handshake_rejects_other_packets() {
        let mut session = session_with(vec![BeaconAck::captured(Generation::V2).into()]);
        assert!(matches!(session.handshake(), Err(Error::UnexpectedResponse(_))));
    }

    #[test]
    fn test_read_adc_and_rssi() {
        let mut session = session_with(vec![
            hello(),
            ReadAdcAck::new(0x0812, 0x0003).into(),
            ReadRssiAck::new(0x7a, 0x3b, 0x29).into(),
        ]);
        session.handshake().unwrap();
        let adc = session.read_adc().unwrap();
        assert_eq!((adc.voltage(), adc.current()), (0x0812, 0x0003));
        let rssi = session.read_rssi().unwrap();
        assert_eq!(rssi.rssi(), 0x7a);

        let requests = sent(&session);
        assert!(matches!(requests[1], Packet::ReadAdcReq(_)));
        assert!(matches!(requests[2], Packet::ReadRssiReq(_)));
    }

    #[test]
    fn test_wrong_ack_keeps_session_ready() {
        let mut session = session_with(vec![hello(), ReadRssiAck::new(1, 2, 3).into()]);
        session.handshake().unwrap();
        assert!(matches!(session.read_adc(), Err(Error::UnexpectedResponse(_))));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_reboot_reads_banner() {
        let mut session = session_with(vec![hello()]).with_reboot_settle(Duration::ZERO);
        session.handshake().unwrap();
        session
            .link
            .port_mut()
            .push(&hex::decode("322e30302e303600340a00000d0a").unwrap());
        assert_eq!(session.reboot().unwrap(), "2.00.06");
        assert_eq!(session.state(), SessionState::AwaitingBeacon);
    }

    #[test]
    fn test_reboot_without_banner_fails() {
        let mut session = session_with(vec![hello()]).with_reboot_settle(Duration::ZERO);
        session.handshake().unwrap();
        let err = session.reboot().unwrap_err();
        assert!(err.to_string().contains("missing bootloader message"));
    }
}
