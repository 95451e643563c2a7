//! Packed firmware image format.
//!
//! ## Layout
//!
//! ```text
//! +-----------------------------------------------+--------+
//! |          XOR-scrambled image body             | CRC16  |
//! +-----------------------------------------------+--------+
//! | blob[..0x2000] | version (16B) | blob[0x2000..] | u16 LE |
//! +-----------------------------------------------+--------+
//! ```
//!
//! The body is XORed with a repeating 128-byte key. The CRC is the
//! table-driven CRC16 over the scrambled body. Blobs shorter than 0x2000
//! bytes carry the version field at their end instead.

use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_ccitt_table;

/// Position of the version field in the unscrambled body.
pub const VERSION_OFFSET: usize = 0x2000;

/// Width of the version field.
pub const VERSION_LEN: usize = 16;

const XOR_KEY: [u8; 128] = [
    0x47, 0x22, 0xc0, 0x52, 0x5d, 0x57, 0x48, 0x94, 0xb1, 0x60, 0x60, 0xdb, 0x6f, 0xe3, 0x4c, 0x7c,
    0xd8, 0x4a, 0xd6, 0x8b, 0x30, 0xec, 0x25, 0xe0, 0x4c, 0xd9, 0x00, 0x7f, 0xbf, 0xe3, 0x54, 0x05,
    0xe9, 0x3a, 0x97, 0x6b, 0xb0, 0x6e, 0x0c, 0xfb, 0xb1, 0x1a, 0xe2, 0xc9, 0xc1, 0x56, 0x47, 0xe9,
    0xba, 0xf1, 0x42, 0xb6, 0x67, 0x5f, 0x0f, 0x96, 0xf7, 0xc9, 0x3c, 0x84, 0x1b, 0x26, 0xe1, 0x4e,
    0x3b, 0x6f, 0x66, 0xe6, 0xa0, 0x6a, 0xb0, 0xbf, 0xc6, 0xa5, 0x70, 0x3a, 0xba, 0x18, 0x9e, 0x27,
    0x1a, 0x53, 0x5b, 0x71, 0xb1, 0x94, 0x1e, 0x18, 0xf2, 0xd6, 0x81, 0x02, 0x22, 0xfd, 0x5a, 0x28,
    0x91, 0xdb, 0xba, 0x5d, 0x64, 0xc6, 0xfe, 0x86, 0x83, 0x9c, 0x50, 0x1c, 0x73, 0x03, 0x11, 0xd6,
    0xaf, 0x30, 0xf4, 0x2c, 0x77, 0xb2, 0x7d, 0xbb, 0x3f, 0x29, 0x28, 0x57, 0x22, 0xd6, 0x92, 0x8b,
];

fn scramble(data: &mut [u8]) {
    for (byte, key) in data.iter_mut().zip(XOR_KEY.iter().cycle()) {
        *byte ^= key;
    }
}

/// Validate a version string for the 16-byte field.
pub fn check_version(version: &str) -> Result<()> {
    if !version.is_ascii() || version.contains('\0') {
        return Err(Error::Validation(format!(
            "version {version:?} must be printable ASCII"
        )));
    }
    if version.len() > VERSION_LEN {
        return Err(Error::Validation(format!(
            "version {version:?} is longer than {VERSION_LEN} bytes"
        )));
    }
    Ok(())
}

/// Scramble `data` with `version` embedded and append the checksum.
pub fn pack(data: &[u8], version: &str) -> Result<Vec<u8>> {
    check_version(version)?;

    let at = data.len().min(VERSION_OFFSET);
    let mut field = [0u8; VERSION_LEN];
    field[..version.len()].copy_from_slice(version.as_bytes());

    let mut body = Vec::with_capacity(data.len() + VERSION_LEN + 2);
    body.extend_from_slice(&data[..at]);
    body.extend_from_slice(&field);
    body.extend_from_slice(&data[at..]);
    scramble(&mut body);

    let crc = crc16_ccitt_table(&body);
    body.extend_from_slice(&crc.to_le_bytes());
    Ok(body)
}

/// Verify the checksum, unscramble, and split out the version string.
pub fn unpack(encoded: &[u8]) -> Result<(Vec<u8>, String)> {
    let Some(body_len) = encoded.len().checked_sub(2) else {
        return Err(Error::Validation(format!(
            "image of {} bytes has no checksum",
            encoded.len()
        )));
    };
    let (body, tail) = encoded.split_at(body_len);
    let expected = u16::from_le_bytes([tail[0], tail[1]]);
    let actual = crc16_ccitt_table(body);
    if expected != actual {
        return Err(Error::CrcMismatch { expected, actual });
    }
    debug!("Image CRC {actual:#06x} OK");

    if body.len() < VERSION_LEN {
        return Err(Error::Validation(format!(
            "image body of {} bytes cannot hold a version field",
            body.len()
        )));
    }

    let mut body = body.to_vec();
    scramble(&mut body);

    let at = (body.len() - VERSION_LEN).min(VERSION_OFFSET);
    let field: Vec<u8> = body.drain(at..at + VERSION_LEN).collect();
    let end = field.iter().position(|&b| b == 0).unwrap_or(VERSION_LEN);
    let version = String::from_utf8_lossy(&field[..end]).into_owned();

    Ok((body, version))
}

/// Raw firmware blob paired with its version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    version: String,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Pair a raw blob with a version string.
    pub fn new(data: Vec<u8>, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        check_version(&version)?;
        Ok(Self { version, data })
    }

    /// Decode a packed image.
    pub fn unpack(encoded: &[u8]) -> Result<Self> {
        let (data, version) = unpack(encoded)?;
        Ok(Self { version, data })
    }

    /// Read and decode a packed image file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let encoded = fs::read(path.as_ref())?;
        debug!(
            "Loaded {} ({} bytes)",
            path.as_ref()
                .display(),
            encoded.len()
        );
        Self::unpack(&encoded)
    }

    /// Encode into the packed form.
    pub fn pack(&self) -> Result<Vec<u8>> {
        pack(&self.data, &self.version)
    }

    /// Version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Raw firmware blob.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume into the raw blob.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Display for FirmwareImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "firmware {:?} ({} bytes)", self.version, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_short_blob_round_trip() {
        let data = blob(0x180);
        let packed = pack(&data, "2.01.23").unwrap();
        assert_eq!(packed.len(), 0x180 + VERSION_LEN + 2);
        let (out, version) = unpack(&packed).unwrap();
        assert_eq!(out, data);
        assert_eq!(version, "2.01.23");
    }

    #[test]
    fn test_full_size_round_trip() {
        for len in [0x2000, 0x2001, 0xe000] {
            let data = blob(len);
            let image = FirmwareImage::new(data.clone(), "*OEFW-v0.22").unwrap();
            let decoded = FirmwareImage::unpack(&image.pack().unwrap()).unwrap();
            assert_eq!(decoded, image, "len {len:#x}");
        }
    }

    #[test]
    fn test_version_sits_at_0x2000() {
        let data = vec![0u8; 0x3000];
        let mut packed = pack(&data, "ABC").unwrap();
        packed.truncate(packed.len() - 2);
        scramble(&mut packed);
        assert_eq!(&packed[VERSION_OFFSET..VERSION_OFFSET + 4], b"ABC\0");
        assert!(packed[..VERSION_OFFSET].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_blob_and_full_width_version() {
        let (out, version) = unpack(&pack(&[], "0123456789abcdef").unwrap()).unwrap();
        assert!(out.is_empty());
        assert_eq!(version, "0123456789abcdef");

        let (_, version) = unpack(&pack(&[1, 2, 3], "").unwrap()).unwrap();
        assert_eq!(version, "");
    }

    #[test]
    fn test_flipped_crc_is_fatal() {
        let mut packed = pack(&blob(0x400), "2.01.23").unwrap();
        let last = packed.len() - 1;
        packed[last] ^= 0x01;
        let err = unpack(&packed).unwrap_err();
        assert!(matches!(err, Error::CrcMismatch { .. }));
        assert!(err.to_string().starts_with("CRC check failed"));
    }

    #[test]
    fn test_corrupt_body_is_fatal() {
        let mut packed = pack(&blob(0x400), "2.01.23").unwrap();
        packed[10] ^= 0x80;
        assert!(matches!(unpack(&packed), Err(Error::CrcMismatch { .. })));
    }

    #[test]
    fn test_bad_versions_rejected() {
        assert!(matches!(pack(&[], "0123456789abcdefX"), Err(Error::Validation(_))));
        assert!(pack(&[], "v\u{e9}").is_err());
        assert!(FirmwareImage::new(vec![], "a\0b").is_err());
    }

    #[test]
    fn test_truncated_input_rejected() {
        assert!(unpack(&[]).is_err());
        assert!(unpack(&[0x00]).is_err());
        // Valid CRC (zero over nothing) but no room for a version
        assert!(matches!(unpack(&[0x00, 0x00]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        fs::write(&path, pack(&blob(0x200), "2.01.26").unwrap()).unwrap();

        let image = FirmwareImage::from_file(&path).unwrap();
        assert_eq!(image.version(), "2.01.26");
        assert_eq!(image.data().len(), 0x200);
    }
}
