//! Block-wise EEPROM transfers in firmware mode.

use super::{Session, SessionState, narrow, unexpected};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::chunker::AddressSpace;
use crate::protocol::packet::{Packet, ReadEepromReq, WriteEepromReq};
use crate::session::report::Event;

impl<P: Port> Session<P> {
    /// Read `length` bytes of EEPROM starting at `offset`.
    pub fn read_eeprom(&mut self, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.begin(SessionState::EepromRead)?;
        let mut data = vec![0u8; length];
        let result = self.read_blocks(offset, &mut data);
        let result = self.finish(result.map(|()| data));
        if result.is_ok() {
            self.reporter.report(&Event::Finished);
        }
        result
    }

    /// Write `data` to EEPROM starting at `offset`.
    ///
    /// Password-protected areas are written too.
    pub fn write_eeprom(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.begin(SessionState::EepromWrite)?;
        let result = self.write_blocks(offset, data);
        self.finish(result)?;
        self.reporter.report(&Event::Finished);
        Ok(())
    }

    fn read_blocks(&mut self, offset: usize, out: &mut [u8]) -> Result<()> {
        let space = AddressSpace::EEPROM;
        let count = space.block_count(out.len());
        space.process(offset, out.len(), |block| {
            self.block_started(block, count);
            let address: u16 = narrow(block.address, "offset")?;
            let size: u8 = narrow(block.len, "size")?;

            let received = self
                .link
                .send(ReadEepromReq::new(address, size, self.timestamp))
                .and_then(|()| self.link.recv());
            let ack = match self.settle(received)? {
                Packet::ReadEepromAck(ack) => ack,
                other => return Err(unexpected(&other)),
            };
            if ack.offset() != address || ack.size() != size {
                return Err(Error::Mismatch(format!(
                    "asked for {size:#04x} bytes at {address:#06x}, got {ack}"
                )));
            }
            let data = ack.data();
            if data.len() < block.len {
                return Err(Error::Mismatch(format!(
                    "block at {address:#06x} carries {:#x} of {:#x} bytes",
                    data.len(),
                    block.len
                )));
            }
            out[block.offset..block.offset + block.len].copy_from_slice(&data[..block.len]);
            self.reporter.report(&Event::BlockDone {
                index: block.index,
                count,
            });
            Ok(())
        })
    }

    fn write_blocks(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let space = AddressSpace::EEPROM;
        let count = space.block_count(data.len());
        space.process(offset, data.len(), |block| {
            self.block_started(block, count);
            let address: u16 = narrow(block.address, "offset")?;
            let chunk = &data[block.offset..block.offset + block.len];
            let request = WriteEepromReq::new(address, chunk, true, self.timestamp)?;

            let received = self.link.send(request).and_then(|()| self.link.recv());
            let ack = match self.settle(received)? {
                Packet::WriteEepromAck(ack) => ack,
                other => return Err(unexpected(&other)),
            };
            if ack.offset() != address {
                return Err(Error::Mismatch(format!("wrote at {address:#06x}, got {ack}")));
            }
            self.reporter.report(&Event::BlockDone {
                index: block.index,
                count,
            });
            Ok(())
        })
    }
}
