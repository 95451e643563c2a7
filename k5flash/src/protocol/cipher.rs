//! AES-128-CBC transform applied to V5 flash chunks.
//!
//! The bootloader holds 16 fixed `(key, iv)` pairs and the version request
//! selects one of them. Each table entry is stored with every 4-byte word
//! byte-reversed relative to what AES consumes. The CBC chain runs across all
//! chunks of one write, so a single cipher instance must see the chunks in
//! order.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::error::{Error, Result};

/// AES block length.
pub const BLOCK_LEN: usize = 16;

type Block = [u8; BLOCK_LEN];

const fn h(s: &[u8; 32]) -> Block {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            _ => panic!("bad hex digit"),
        }
    }
    let mut out = [0u8; BLOCK_LEN];
    let mut i = 0;
    while i < BLOCK_LEN {
        out[i] = (nibble(s[i * 2]) << 4) | nibble(s[i * 2 + 1]);
        i += 1;
    }
    out
}

/// Built-in key table, `(key, iv)` per slot, as stored by the bootloader.
const KEY_TABLE: [(Block, Block); 16] = [
    (h(b"e16e0d29e0c83418987f9433f5ff620e"), h(b"14b7a2be0223e259b2066d8886977e36")),
    (h(b"b0d93af7761a50cacb966eb8a805bcbb"), h(b"916c50fb9e480693b155b2e555cb780a")),
    (h(b"1357cc24d138a57799dd0eec5b9a18f9"), h(b"fb149d4c45e7d7a95aa64bc22765a8c0")),
    (h(b"a8ef4f917688c5c1487f2a6a811e554d"), h(b"32c860dfce65ca302ec534aa5f88884b")),
    (h(b"97a387567b234b55c921cd82f65f0087"), h(b"e8ab4e0e344cb5a0b1e7db7a05d468c3")),
    (h(b"f0240e02ed5da965539d815306f2d34b"), h(b"c6116bd5bea38673746205ee534d589f")),
    (h(b"734dd8ac84c0c422cbca28fec8856473"), h(b"4bfe35582436578014e970ed8dab9ea0")),
    (h(b"7f67480570ba5254d7cee59ca2a483b5"), h(b"96858cdf59454a5fa84faa3663748b8d")),
    (h(b"67ec7c38cefa9edb38bb89b58986eb1a"), h(b"2f9a34bcec302bc6c5b6bc552c166dc9")),
    (h(b"08ea3a7dc8a6e961b7061f7e52ec8e6d"), h(b"5f6f2ecd835d760b5c1e78f0be1a8787")),
    (h(b"4e324c565e32be8a6aaf26d9ff37ee87"), h(b"3d680b15a6274c72bc3313a183f1372b")),
    (h(b"4fd9d7243916543c23ad995937e4bb7c"), h(b"a10be7032960c6d5dcbdc6b4ecfbe31a")),
    (h(b"a1d6c61c8c5c2281dc7e371ca3c3f168"), h(b"925eb778232e8b4b1f06a582498b2149")),
    (h(b"11e065ed3f9e8b96bae61f79a7d8a317"), h(b"8b67978471fbd371dcf44ed92f56562d")),
    (h(b"c4636958e1830f23c6d9ce15b2ddc35a"), h(b"5b7237ddb9c5290e15519018ceacba76")),
    (h(b"bf9862d680f948195f5c90545e1d8578"), h(b"8172ea14916b606855ff2aabe52e993c")),
];

fn reverse_words(mut block: Block) -> Block {
    for word in block.chunks_exact_mut(4) {
        word.reverse();
    }
    block
}

/// Key and IV for `key_number`, in the byte order AES expects.
pub fn key_pair(key_number: u8) -> Result<(Block, Block)> {
    let (key, iv) = KEY_TABLE
        .get(usize::from(key_number))
        .ok_or_else(|| Error::Validation(format!("key number {key_number} out of range 0..16")))?;
    Ok((reverse_words(*key), reverse_words(*iv)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Stateful CBC transform for one flash write.
pub struct FlashCipher {
    aes: Aes128,
    chain: Block,
    direction: Direction,
}

impl FlashCipher {
    fn new(key_number: u8, direction: Direction) -> Result<Self> {
        let (key, iv) = key_pair(key_number)?;
        Ok(Self {
            aes: Aes128::new((&key).into()),
            chain: iv,
            direction,
        })
    }

    /// Host-side encryptor for key slot `key_number`.
    pub fn encryptor(key_number: u8) -> Result<Self> {
        Self::new(key_number, Direction::Encrypt)
    }

    /// Device-side decryptor for key slot `key_number`.
    pub fn decryptor(key_number: u8) -> Result<Self> {
        Self::new(key_number, Direction::Decrypt)
    }

    /// Transform `data` in place, continuing the chain from the previous call.
    ///
    /// `data` must be a whole number of AES blocks.
    pub fn apply(&mut self, data: &mut [u8]) -> Result<()> {
        if data.len() % BLOCK_LEN != 0 {
            return Err(Error::Validation(format!(
                "cipher input of {} bytes is not a multiple of {BLOCK_LEN}",
                data.len()
            )));
        }
        for block in data.chunks_exact_mut(BLOCK_LEN) {
            match self.direction {
                Direction::Encrypt => {
                    for (b, c) in block.iter_mut().zip(self.chain) {
                        *b ^= c;
                    }
                    self.aes.encrypt_block(block.into());
                    self.chain.copy_from_slice(block);
                },
                Direction::Decrypt => {
                    let mut next = [0u8; BLOCK_LEN];
                    next.copy_from_slice(block);
                    self.aes.decrypt_block(block.into());
                    for (b, c) in block.iter_mut().zip(self.chain) {
                        *b ^= c;
                    }
                    self.chain = next;
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_reverses_words() {
        let (key, iv) = key_pair(0).unwrap();
        assert_eq!(hex::encode(key), "290d6ee11834c8e033947f980e62fff5");
        assert_eq!(hex::encode(iv), "bea2b71459e22302886d06b2367e9786");
        assert!(key_pair(15).is_ok());
        assert!(matches!(key_pair(16), Err(Error::Validation(_))));
    }

    #[test]
    fn test_encrypt_matches_reference_vector() {
        let mut data: Vec<u8> = (0..32).collect();
        let mut cipher = FlashCipher::encryptor(0).unwrap();
        cipher.apply(&mut data).unwrap();
        assert_eq!(
            hex::encode(&data),
            "7eae6f123f490ce4faed903ad407b78642aa8534a4589ee5890efc7a2e74ef90"
        );

        // The chain carries over into the next call
        let mut tail = [0xffu8; 16];
        cipher.apply(&mut tail).unwrap();
        assert_eq!(hex::encode(tail), "adbb87c6745d0a62cd50212eda78b12b");
    }

    #[test]
    fn test_decrypt_inverts_encrypt_across_chunks() {
        let chunks: Vec<Vec<u8>> = (0..3u8).map(|n| vec![n.wrapping_mul(37); 0x100]).collect();

        let mut enc = FlashCipher::encryptor(7).unwrap();
        let mut dec = FlashCipher::decryptor(7).unwrap();
        for chunk in &chunks {
            let mut buf = chunk.clone();
            enc.apply(&mut buf).unwrap();
            assert_ne!(&buf, chunk);
            dec.apply(&mut buf).unwrap();
            assert_eq!(&buf, chunk);
        }
    }

    #[test]
    fn test_partial_block_rejected() {
        let mut cipher = FlashCipher::encryptor(0).unwrap();
        assert!(cipher.apply(&mut [0u8; 15]).is_err());
    }
}
