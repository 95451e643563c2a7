//! Splits an address range into bounded blocks.
//!
//! Every multi-packet transfer (EEPROM read/write, flash write) walks its
//! range through [`AddressSpace::process`]. Bounds are validated before the
//! first block is emitted, so a bad request never reaches the device.

use crate::error::{Error, Result};

/// One block handed to the per-block callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Zero-based block index.
    pub index: usize,
    /// Absolute address of the first byte.
    pub address: usize,
    /// Position of the first byte relative to the start of the transfer.
    pub offset: usize,
    /// Number of bytes in this block.
    pub len: usize,
}

/// Addressable range plus block sizing for one kind of transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    /// Lowest valid address.
    pub min_addr: usize,
    /// Highest valid address (inclusive).
    pub max_addr: usize,
    /// Nominal block length; the last block may be shorter.
    pub block_size: usize,
    /// Largest block the device accepts.
    pub max_block_size: usize,
}

impl AddressSpace {
    /// EEPROM: `0x0000..0x2000`, 0x80-byte blocks.
    pub const EEPROM: Self = Self::new(0x0000, 0x1fff, 0x80, 0xff);

    /// Create a new address space.
    pub const fn new(min_addr: usize, max_addr: usize, block_size: usize, max_block_size: usize) -> Self {
        Self {
            min_addr,
            max_addr,
            block_size,
            max_block_size,
        }
    }

    /// Number of blocks a valid transfer of `length` bytes is split into.
    pub fn block_count(&self, length: usize) -> usize {
        if self.block_size == 0 {
            return 0;
        }
        length.div_ceil(self.block_size)
    }

    /// Reject `(offset, length)` unless the whole range lies inside this space.
    pub fn validate(&self, offset: usize, length: usize) -> Result<()> {
        if self.block_size == 0 || self.block_size > self.max_block_size {
            return Err(Error::Validation(format!(
                "block size {:#x} must be in 1..={:#x}",
                self.block_size, self.max_block_size
            )));
        }
        if offset < self.min_addr || offset > self.max_addr {
            return Err(Error::Validation(format!(
                "offset {offset:#06x} out of range {:#06x}..={:#06x}",
                self.min_addr, self.max_addr
            )));
        }
        let span = self.max_addr - self.min_addr + 1;
        let end = offset.checked_add(length);
        match end {
            Some(end) if length <= span && end <= self.max_addr + 1 => Ok(()),
            _ => Err(Error::Validation(format!(
                "range {offset:#06x}+{length:#06x} exceeds {:#06x}..={:#06x}",
                self.min_addr, self.max_addr
            ))),
        }
    }

    /// Walk `[offset, offset + length)` block by block.
    ///
    /// The callback runs once per block in ascending order. The first error it
    /// returns stops the walk and is propagated unchanged.
    pub fn process<F>(&self, offset: usize, length: usize, mut on_block: F) -> Result<()>
    where
        F: FnMut(Block) -> Result<()>,
    {
        self.validate(offset, length)?;

        let mut done = 0;
        let mut index = 0;
        while done < length {
            let len = self.block_size.min(length - done);
            let address = offset + done;
            if address > self.max_addr || len > self.max_block_size || address + len > self.max_addr + 1 {
                return Err(Error::Validation(format!(
                    "block {index} at {address:#06x}+{len:#x} out of range"
                )));
            }
            on_block(Block {
                index,
                address,
                offset: done,
                len,
            })?;
            done += len;
            index += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(space: &AddressSpace, offset: usize, length: usize) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        space.process(offset, length, |b| {
            blocks.push(b);
            Ok(())
        })?;
        Ok(blocks)
    }

    #[test]
    fn test_blocks_cover_range_exactly() {
        let space = AddressSpace::EEPROM;
        for (offset, length) in [(0, 0x2000), (0x10, 0x81), (0x1f80, 0x80), (0x1fff, 1), (0x123, 0)] {
            let blocks = collect(&space, offset, length).unwrap();
            let mut next = offset;
            for (i, block) in blocks.iter().enumerate() {
                assert_eq!(block.index, i);
                assert_eq!(block.address, next);
                assert_eq!(block.offset, next - offset);
                assert!(block.len > 0 && block.len <= space.max_block_size);
                next += block.len;
            }
            assert_eq!(next, offset + length);
            assert_eq!(blocks.len(), space.block_count(length));
        }
    }

    #[test]
    fn test_last_block_is_short() {
        let flash = AddressSpace::new(0, 0xebff, 0x100, 0x100);
        let blocks = collect(&flash, 0, 0x101).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].len, 0x100);
        assert_eq!(blocks[1].len, 1);
        assert_eq!(blocks[1].address, 0x100);
    }

    #[test]
    fn test_out_of_range_rejects_before_any_block() {
        let space = AddressSpace::EEPROM;
        for (offset, length) in [(0x2000, 1), (0x1fff, 2), (0, 0x2001), (usize::MAX, 1)] {
            let mut called = false;
            let result = space.process(offset, length, |_| {
                called = true;
                Ok(())
            });
            assert!(matches!(result, Err(Error::Validation(_))), "{offset:#x}+{length:#x}");
            assert!(!called);
        }
    }

    #[test]
    fn test_offset_below_minimum_rejected() {
        let space = AddressSpace::new(0x100, 0x1ff, 0x10, 0x10);
        assert!(space.validate(0xff, 1).is_err());
        assert!(space.validate(0x100, 0x100).is_ok());
        assert!(space.validate(0x100, 0x101).is_err());
    }

    #[test]
    fn test_callback_failure_stops_walk() {
        let space = AddressSpace::EEPROM;
        let mut seen = Vec::new();
        let result = space.process(0, 0x400, |b| {
            seen.push(b.index);
            if b.index == 3 {
                Err(Error::Mismatch("block 3".into()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(Error::Mismatch(_))));
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_block_size_above_device_limit_rejected() {
        let space = AddressSpace::new(0, 0xffff, 0x200, 0x100);
        assert!(space.validate(0, 0x10).is_err());
    }
}
