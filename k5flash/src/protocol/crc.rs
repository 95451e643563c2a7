//! CRC16-XMODEM (CCITT polynomial 0x1021, MSB first, initial value 0).
//!
//! The envelope checksum is computed bit by bit; firmware images use the
//! table-driven form. Both produce the same value for the same bytes.

const POLY: u16 = 0x1021;

/// Lookup table for [`crc16_ccitt_table`], one entry per leading byte.
pub const CRC16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Bitwise CRC16-XMODEM.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Table-driven CRC16-CCITT with zero initial value.
pub fn crc16_ccitt_table(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |crc, &byte| {
            CRC16_TABLE[usize::from((crc >> 8) as u8 ^ byte)] ^ (crc << 8)
        })
}
