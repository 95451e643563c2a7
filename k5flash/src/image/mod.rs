//! Firmware image container handling.

pub mod packed;

pub use packed::{FirmwareImage, pack, unpack};
