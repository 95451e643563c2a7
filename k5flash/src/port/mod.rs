//! Byte transport used by the protocol layer.
//!
//! The protocol code never touches a serial driver directly. It talks to a
//! [`Port`], which only has to move bytes, report how many are waiting and
//! honour a read timeout:
//!
//! ```text
//! +------------------------------+
//! | Session / Monitor / Emulator |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |  PacketLink (envelope I/O)   |
//! +--------------+---------------+
//!                |
//!                v
//! +--------------+---------------+
//! |         Port trait           |
//! +--------------+---------------+
//!                |
//!        +-------+--------+
//!        v                v
//!   NativePort       test doubles
//!  (serialport)
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rate used by the radio in both firmware and bootloader mode.
pub const DEFAULT_BAUD: u32 = 38400;

/// Read timeout applied to every blocking receive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial port configuration.
///
/// Framing is fixed at 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Blocking byte transport.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Number of received bytes waiting to be read.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Read exactly `len` bytes.
    ///
    /// A read timeout becomes [`Error::Timeout`] and carries the bytes that did
    /// arrive, so callers can log partial frames.
    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("port closed after {filled} of {len} bytes"),
                    )));
                },
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "read {filled} of {len} bytes [{}]",
                        hex::encode(&buf[..filled])
                    )));
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};


#[cfg(test)]
mod tests {
    use super::mock::MockPort;
    use super::*;

    #[test]
    fn test_read_exact_bytes_collects_across_reads() {
        let mut port = MockPort::new(&[1, 2, 3, 4, 5]);
        assert_eq!(port.read_exact_bytes(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(port.read_exact_bytes(2).unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_read_exact_bytes_timeout_is_distinguishable() {
        let mut port = MockPort::new(&[0xab, 0xcd]);
        let err = port.read_exact_bytes(4).unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("abcd"));
    }

    #[test]
    fn test_serial_config_defaults_match_radio() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 9600).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
