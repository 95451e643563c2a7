//! Error types for k5flash.

use std::io;
use thiserror::Error;

/// Result type for k5flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for k5flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport did not deliver the expected bytes in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed envelope on the wire (bad header, bad footer, truncated frame).
    #[error("Framing error: {0}")]
    Framing(String),

    /// Arguments rejected before any I/O was attempted.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// Firmware image checksum mismatch.
    #[error("CRC check failed: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC stored in the image.
        expected: u16,
        /// CRC computed over the image body.
        actual: u16,
    },

    /// The device answered with a packet the current step cannot accept.
    #[error("Unexpected response {0}")]
    UnexpectedResponse(String),

    /// The device acknowledged a block for a different offset, size or chunk.
    #[error("Mismatched response: {0}")]
    Mismatch(String),

    /// The bootloader reported a non-zero result code for a chunk.
    #[error("Write failed with error code {code} at chunk {chunk}")]
    DeviceRejected {
        /// Zero-based chunk number.
        chunk: u16,
        /// Result code reported by the device.
        code: u16,
    },

    /// Only beacons arrived while waiting for a write acknowledgement.
    #[error("No response for chunk {0}")]
    NoResponse(u16),

    /// Image would be written past the last writable flash address.
    #[error("DANGEROUS FLASH ADDRESS WRITE! size={size:#06x}, offset_final={offset_final:#06x}")]
    DangerousWrite {
        /// Image length in bytes.
        size: usize,
        /// First address past the last written chunk.
        offset_final: usize,
    },

    /// No serial endpoint found.
    #[error("Device not found")]
    DeviceNotFound,

    /// Session has been closed after an earlier transport failure.
    #[error("Session closed")]
    SessionClosed,

    /// Unsupported operation on this build or bootloader.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error came from a receive timeout.
    ///
    /// Callers may retry a whole command on timeout; the library never does.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Whether this error leaves the transport in an unknown state.
    pub(crate) fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::Framing(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
