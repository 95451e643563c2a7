//! Chunked flash write in bootloader mode.

use log::{debug, info};

use super::{Session, SessionState, narrow, unexpected};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::chunker::AddressSpace;
use crate::protocol::packet::{
    FLASH_CHUNK_SIZE, FlashVersionReq, FlashWriteAck, FlashWriteReq, Generation, Packet,
};
use crate::session::report::Event;

/// Beacons tolerated while waiting for one chunk acknowledgement.
pub const MAX_ABSORBED_BEACONS: usize = 10;

/// Flash area the usage figure is relative to.
const USAGE_BASE: usize = 0xf000;

/// Share of the flash an image occupies, as `"12.34%"`.
pub fn flash_usage(len: usize) -> String {
    let hundredths = len * 10_000 / USAGE_BASE;
    format!("{}.{:02}%", hundredths / 100, hundredths % 100)
}

impl<P: Port> Session<P> {
    /// Write a raw firmware image, announcing `version` (or the stock default).
    ///
    /// Size limits, the version string and the key number are checked before
    /// anything is sent or received. If no beacon has been seen yet, waits for
    /// one first. Any rejected chunk aborts the whole write; nothing is retried.
    pub fn write_flash(&mut self, version: Option<&str>, image: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let chunk_count = self.check_image(image)?;
        self.check_version(version)?;
        self.status(&format!(
            "Write FLASH size=0x{:04x} ({} used)",
            image.len(),
            flash_usage(image.len())
        ));

        if self.state == SessionState::AwaitingBeacon {
            self.wait_for_beacon()?;
        }
        self.begin(SessionState::FlashWrite)?;
        let result = self.write_chunks(version, image, chunk_count);
        self.finish(result)?;
        self.reporter.report(&Event::Finished);
        Ok(())
    }

    /// Validate the image size and return its chunk count.
    fn check_image(&self, image: &[u8]) -> Result<u16> {
        let limits = self.limits;
        if image.is_empty() {
            return Err(Error::Validation("empty firmware image".into()));
        }
        if image.len() > limits.max_image_size {
            return Err(Error::Validation(format!(
                "image of {:#x} bytes exceeds {:#x}",
                image.len(),
                limits.max_image_size
            )));
        }
        let chunks = image.len().div_ceil(FLASH_CHUNK_SIZE);
        let offset_final = chunks * FLASH_CHUNK_SIZE;
        if offset_final > limits.max_flash_addr + 1 {
            return Err(Error::DangerousWrite {
                size: image.len(),
                offset_final,
            });
        }
        narrow(chunks, "chunk count")
    }

    /// Validate the announced version and the key slot.
    ///
    /// Before a beacon the generation is unknown, so the widest limit applies
    /// here and the V2 limit is enforced once the beacon has been read.
    fn check_version(&self, version: Option<&str>) -> Result<()> {
        let generation = match self.state {
            SessionState::AwaitingBeacon => Generation::V5,
            _ => self.variant.generation(),
        };
        let version = version.unwrap_or_default();
        FlashVersionReq::validate(generation, version, self.key_number)
    }

    fn write_chunks(&mut self, version: Option<&str>, image: &[u8], chunk_count: u16) -> Result<()> {
        let generation = self.variant.generation();
        let request = self.variant.version_request(version)?;
        let mut cipher = self.variant.encryptor()?;

        self.status(&format!("Send version \"{}\"...", request.version()));
        let received = self.link.send(request).and_then(|()| self.link.recv());
        match self.settle(received)? {
            Packet::BeaconAck(beacon) => {
                let version = beacon.version().unwrap_or_default();
                self.status(&format!("   Bootloader: \"{version}\""));
            },
            other => return Err(unexpected(&other)),
        }

        let sequence_id = self.ids.next_id();
        info!("Flash write {sequence_id:#010x}: {chunk_count} chunks, {}", self.variant);

        let space = AddressSpace::new(
            self.limits.min_flash_addr,
            self.limits.max_flash_addr,
            FLASH_CHUNK_SIZE,
            FLASH_CHUNK_SIZE,
        );
        let count = usize::from(chunk_count);
        space.process(0, image.len(), |block| {
            self.block_started(block, count);

            let mut chunk = [0xffu8; FLASH_CHUNK_SIZE];
            chunk[..block.len].copy_from_slice(&image[block.offset..block.offset + block.len]);
            if let Some(cipher) = cipher.as_mut() {
                cipher.apply(&mut chunk)?;
            }

            let chunk_number: u16 = narrow(block.offset / FLASH_CHUNK_SIZE, "chunk number")?;
            let request = FlashWriteReq::new(
                generation,
                sequence_id,
                chunk_number,
                chunk_count,
                &chunk,
                narrow(block.len, "chunk length")?,
            )?;
            let sent = self.link.send(request);
            self.settle(sent)?;

            let ack = self.await_write_ack(chunk_number)?;
            if ack.sequence_id() != sequence_id {
                debug!(
                    "Ack for chunk {chunk_number} carries sequence {:#010x}, sent {sequence_id:#010x}",
                    ack.sequence_id()
                );
            }
            if ack.result() != 0 {
                return Err(Error::DeviceRejected {
                    chunk: chunk_number,
                    code: ack.result(),
                });
            }
            if ack.chunk_number() != chunk_number {
                return Err(Error::Mismatch(format!(
                    "wrote chunk {chunk_number}, got {ack}"
                )));
            }
            self.reporter.report(&Event::BlockDone {
                index: block.index,
                count,
            });
            Ok(())
        })
    }

    /// Receive until a write acknowledgement arrives, skipping beacons.
    fn await_write_ack(&mut self, chunk_number: u16) -> Result<FlashWriteAck> {
        let mut absorbed = 0;
        loop {
            let received = self.link.recv();
            match self.settle(received)? {
                Packet::FlashWriteAck(ack) => return Ok(ack),
                Packet::BeaconAck(_) => {
                    absorbed += 1;
                    debug!("Beacon while waiting for chunk {chunk_number} ({absorbed})");
                    self.reporter.report(&Event::BeaconAbsorbed);
                    if absorbed > MAX_ABSORBED_BEACONS {
                        return Err(Error::NoResponse(chunk_number));
                    }
                },
                other => return Err(unexpected(&other)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::protocol::packet::{BeaconAck, FlashVersionReq, Generation};
    use crate::session::{DeviceLimits, ProtocolVariant};

    const SEQ: u32 = 0x1234_5678;

    fn beacon() -> Packet {
        BeaconAck::captured(Generation::V2).into()
    }

    fn ack(chunk: u16, result: u16) -> Packet {
        FlashWriteAck::new(Generation::V2, SEQ, chunk, result).into()
    }

    fn flashing(replies: Vec<Packet>) -> Session<crate::port::mock::MockPort> {
        session_with(replies).with_id_source(|| SEQ)
    }

    fn writes(session: &Session<crate::port::mock::MockPort>) -> Vec<FlashWriteReq> {
        sent(session)
            .into_iter()
            .filter_map(|packet| match packet {
                Packet::FlashWriteReq(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_flash_usage() {
        assert_eq!(flash_usage(0xf000), "100.00%");
        assert_eq!(flash_usage(0x7800), "50.00%");
        assert_eq!(flash_usage(0x101), "0.41%");
    }

    #[test]
    fn test_flash_write_splits_and_pads_last_chunk() {
        let image: Vec<u8> = (0..0x101u32).map(|i| i as u8).collect();
        let mut session = flashing(vec![beacon(), beacon(), ack(0, 0), ack(1, 0)]);
        session.write_flash(None, &image).unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        let requests = sent(&session);
        let Packet::FlashVersionReq(version) = &requests[0] else {
            panic!("expected version request");
        };
        assert_eq!(version.version(), "2.01.23");

        let chunks = writes(&session);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].length(), 0x100);
        assert_eq!(chunks[0].block(), &image[..0x100]);
        assert_eq!(chunks[1].length(), 1);
        assert_eq!(chunks[1].block()[0], 0x00);
        assert!(chunks[1].block()[1..].iter().all(|&b| b == 0xff));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(usize::from(chunk.chunk_number()), i);
            assert_eq!(chunk.chunk_count(), 2);
            assert_eq!(chunk.sequence_id(), SEQ);
        }
    }

    #[test]
    fn test_rejected_chunk_aborts_remaining() {
        let image = vec![0x5a; 10 * FLASH_CHUNK_SIZE];
        let mut session = flashing(vec![
            beacon(),
            beacon(),
            ack(0, 0),
            ack(1, 0),
            ack(2, 0),
            ack(3, 1),
        ]);
        let err = session.write_flash(Some("2.01.26"), &image).unwrap_err();
        assert!(matches!(err, Error::DeviceRejected { chunk: 3, code: 1 }));
        assert!(err.to_string().contains("chunk 3"));

        let chunks = writes(&session);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().map(FlashWriteReq::chunk_number), Some(3));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_dangerous_write_sends_nothing() {
        let image = vec![0; 0xec01];
        let mut session = flashing(vec![beacon()]);
        let err = session.write_flash(None, &image).unwrap_err();
        assert!(matches!(
            err,
            Error::DangerousWrite {
                size: 0xec01,
                offset_final: 0xed00
            }
        ));
        assert!(session.link().port().write_buf.is_empty());
        assert_eq!(session.link().port().read_buf.len(), framed(beacon()).len());
        assert_eq!(session.state(), SessionState::AwaitingBeacon);
    }

    #[test]
    fn test_raised_flash_limit_allows_larger_image() {
        let image = vec![0; 0xec01];
        let mut session = flashing(vec![beacon()])
            .with_limits(DeviceLimits::default().with_max_flash_addr(0xf7ff));
        // Passes the gate, then runs out of scripted replies.
        let err = session.write_flash(None, &image).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_oversized_image_rejected() {
        let mut session = flashing(vec![]);
        let err = session.write_flash(None, &vec![0; 0x10001]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_beacons_between_acks_are_absorbed() {
        let mut replies = vec![beacon(), beacon()];
        replies.extend(std::iter::repeat_with(beacon).take(MAX_ABSORBED_BEACONS));
        replies.push(ack(0, 0));
        let mut session = flashing(replies);
        session.write_flash(None, &[1, 2, 3]).unwrap();
    }

    #[test]
    fn test_too_many_beacons_is_no_response() {
        let mut replies = vec![beacon(), beacon()];
        replies.extend(std::iter::repeat_with(beacon).take(MAX_ABSORBED_BEACONS + 1));
        let mut session = flashing(replies);
        let err = session.write_flash(None, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::NoResponse(0)));
    }

    #[test]
    fn test_chunk_number_mismatch_aborts() {
        let mut session = flashing(vec![beacon(), beacon(), ack(1, 0)]);
        let err = session.write_flash(None, &[0; 0x200]).unwrap_err();
        assert!(matches!(err, Error::Mismatch(_)));
        assert_eq!(writes(&session).len(), 1);
    }

    #[test]
    fn test_foreign_sequence_id_is_tolerated() {
        let foreign = FlashWriteAck::new(Generation::V2, SEQ ^ 1, 0, 0).into();
        let mut session = flashing(vec![beacon(), beacon(), foreign]);
        session.write_flash(None, &[7; 0x10]).unwrap();
        assert_eq!(writes(&session)[0].sequence_id(), SEQ);
    }

    #[test]
    fn test_version_reply_must_be_beacon() {
        let mut session = flashing(vec![beacon(), ack(0, 0)]);
        let err = session.write_flash(None, &[0; 0x10]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(ref s) if s.starts_with("FlashWriteAck")));
        assert!(writes(&session).is_empty());
    }

    #[test]
    fn test_v5_announces_key_and_encrypts() {
        let v5 = BeaconAck::captured(Generation::V5);
        let mut session = flashing(vec![
            v5.clone().into(),
            v5.into(),
            FlashWriteAck::new(Generation::V5, SEQ, 0, 0).into(),
        ]);
        let image = [0x42u8; 0x20];
        session.write_flash(None, &image).unwrap();
        assert_eq!(session.variant(), ProtocolVariant::V5 { key_number: 0 });

        let requests = sent(&session);
        let Packet::FlashVersionReq(version) = &requests[0] else {
            panic!("expected version request");
        };
        assert_eq!(version.generation(), Generation::V5);
        assert_eq!(version.version(), "5.00.05");
        assert_eq!(version.key_number(), Some(0));

        let chunk = &writes(&session)[0];
        assert_eq!(chunk.generation(), Generation::V5);
        assert_eq!(chunk.length(), 0x20);
        let mut plain = [0xffu8; FLASH_CHUNK_SIZE];
        plain[..0x20].copy_from_slice(&image);
        assert_ne!(chunk.block(), &plain[..]);

        let mut decrypted = chunk.block().to_vec();
        crate::protocol::cipher::FlashCipher::decryptor(0)
            .unwrap()
            .apply(&mut decrypted)
            .unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn test_version_string_validated_before_io() {
        let mut session = flashing(vec![beacon()]);
        session.wait_for_beacon().unwrap();
        let err = session
            .write_flash(Some("this version is far too long"), &[0; 4])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(session.link().port().write_buf.is_empty());
        assert!(FlashVersionReq::v2("this version is far too long").is_err());
    }

    #[test]
    fn test_bad_arguments_rejected_before_beacon_wait() {
        let queued = framed(beacon()).len();

        let mut session = flashing(vec![beacon()]);
        let err = session
            .write_flash(Some("this version is far too long"), &[0; 4])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(session.link().port().read_buf.len(), queued);
        assert_eq!(session.state(), SessionState::AwaitingBeacon);

        let mut session = flashing(vec![beacon()]).with_key_number(16);
        let err = session.write_flash(None, &[0; 4]).unwrap_err();
        assert!(err.to_string().contains("key number 16"));
        assert_eq!(session.link().port().read_buf.len(), queued);
        assert!(session.link().port().write_buf.is_empty());
    }

    #[test]
    fn test_v2_bootloader_rejects_full_width_version() {
        let mut session = flashing(vec![beacon()]);
        session.wait_for_beacon().unwrap();
        let err = session
            .write_flash(Some("0123456789abcdef"), &[0; 4])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(session.link().port().write_buf.is_empty());
    }
}
