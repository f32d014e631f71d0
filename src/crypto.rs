//! Per-packet AES-128-CBC decryption of RTP audio payloads.
//!
//! RAOP encrypts the ALAC payload of each audio packet independently under
//! the session AES key, with the session IV used as the chaining value for
//! every packet (not just the first). A payload need not be a multiple of
//! the block size: any trailing 1-15 bytes are copied through unencrypted.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use thiserror::Error;

const BLOCK_SIZE: usize = 16;

/// Errors from [`PacketDecryptor::decrypt`].
#[derive(Debug, Error)]
pub enum DecryptError {
    /// The AES key was not exactly 16 bytes.
    #[error("aes key must be 16 bytes, got {0}")]
    BadKeyLength(usize),
    /// The AES IV was not exactly 16 bytes.
    #[error("aes iv must be 16 bytes, got {0}")]
    BadIvLength(usize),
}

/// Decrypts audio packet payloads with a fixed key and a fixed starting IV.
///
/// The IV is reset to the session IV before every packet: RAOP does not
/// chain ciphertext across packets, only within one.
pub struct PacketDecryptor {
    cipher: Aes128,
    iv: [u8; BLOCK_SIZE],
}

impl PacketDecryptor {
    /// Builds a decryptor from the session AES key and IV negotiated during
    /// `ANNOUNCE`/`SETUP`.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, DecryptError> {
        if key.len() != BLOCK_SIZE {
            return Err(DecryptError::BadKeyLength(key.len()));
        }
        if iv.len() != BLOCK_SIZE {
            return Err(DecryptError::BadIvLength(iv.len()));
        }
        let mut iv_buf = [0u8; BLOCK_SIZE];
        iv_buf.copy_from_slice(iv);
        Ok(Self {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            iv: iv_buf,
        })
    }

    /// Decrypts `payload` in place semantics, returning the plaintext.
    /// Whole 16-byte blocks are AES-CBC decrypted; a trailing partial block
    /// (if any) is copied through unchanged.
    #[must_use]
    pub fn decrypt(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len());
        let mut prev = self.iv;
        let mut chunks = payload.chunks_exact(BLOCK_SIZE);

        for block in &mut chunks {
            let mut buf = GenericArray::clone_from_slice(block);
            self.cipher.decrypt_block(&mut buf);
            for (b, p) in buf.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            out.extend_from_slice(&buf);
            prev.copy_from_slice(block);
        }
        out.extend_from_slice(chunks.remainder());
        out
    }
}
