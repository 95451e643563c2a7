//! # k5flash
//!
//! A library for talking to Quansheng UV-K5 family radios over their
//! programming cable.
//!
//! This crate provides:
//!
//! - The obfuscated serial envelope and the packet catalogue
//! - Firmware-mode sessions: handshake, ADC/RSSI readout, EEPROM
//!   read/write, reboot into the bootloader
//! - Bootloader flash writes for both bootloader generations (V2 plain
//!   chunks, V5 AES-CBC encrypted chunks)
//! - The packed firmware image format (`pack`/`unpack`)
//! - A passive packet monitor and a bootloader emulator
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for discovery types
//!
//! ## Example
//!
//! ```rust,no_run
//! use k5flash::{FirmwareImage, Session};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         use k5flash::{NativePort, SerialConfig};
//!
//!         let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 38400))?;
//!         let mut session = Session::open(port)?;
//!         session.write_flash(Some(image.version()), image.data())?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod emulator;
pub mod error;
pub mod image;
pub mod monitor;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
///
/// Suitable as the stop condition of [`Monitor::run`] and [`Emulator::run`].
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, auto_detect_port, detect_ports, select_port},
    emulator::{Emulator, EmulatorEvent},
    error::{Error, Result},
    image::{FirmwareImage, pack, unpack},
    monitor::Monitor,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Decoded, Generation, Packet, PacketLink, envelope},
    session::{
        DeviceLimits, Event, HelloInfo, NullReporter, ProtocolVariant, Reporter, Session,
        SessionState,
    },
};
