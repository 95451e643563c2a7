//! Wire protocol: envelope framing, packet model and the helpers the
//! session builds on.

pub mod chunker;
pub mod cipher;
pub mod crc;
pub mod envelope;
pub mod link;
pub mod packet;

// Re-export common types
pub use chunker::{AddressSpace, Block};
pub use cipher::FlashCipher;
pub use link::PacketLink;
pub use packet::{Decoded, Generation, Packet, RawPacket, ShapeWarning};
