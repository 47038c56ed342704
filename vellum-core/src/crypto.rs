//! Optional AEAD-at-rest encryption for log records.
//!
//! When a key is configured, every record payload written to the log is
//! wrapped as `[12B nonce][ciphertext][16B tag]` using AES-256-GCM. The
//! key itself never touches disk; it is supplied at startup (file path or
//! env var, see `vellum-server::config`) and held only in memory.

use crate::error::{CResult, Error};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A loaded 256-bit AES-GCM key, shared by every collection's log.
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
    rng: SystemRandom,
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        EncryptionKey { bytes, rng: SystemRandom::new() }
    }

    /// Parses a key from its hex-encoded file contents (64 hex chars).
    pub fn from_hex(hex: &str) -> CResult<Self> {
        let hex = hex.trim();
        if hex.len() != KEY_LEN * 2 {
            return Err(Error::Internal(format!(
                "encryption key must be {} hex characters, got {}",
                KEY_LEN * 2,
                hex.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        for i in 0..KEY_LEN {
            bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::Internal("encryption key is not valid hex".into()))?;
        }
        Ok(EncryptionKey::from_bytes(bytes))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::Internal("failed to generate nonce".into()))?;

        let unbound = UnboundKey::new(&AES_256_GCM, &self.bytes)
            .map_err(|_| Error::Internal("invalid encryption key".into()))?;
        let key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut out = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut out)
            .map_err(|_| Error::Internal("encryption failed".into()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + out.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&out);
        Ok(envelope)
    }

    pub fn decrypt(&self, envelope: &[u8]) -> CResult<Vec<u8>> {
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::DecryptionFailed);
        }
        let (nonce_bytes, rest) = envelope.split_at(NONCE_LEN);
        let nonce_bytes: [u8; NONCE_LEN] =
            nonce_bytes.try_into().map_err(|_| Error::DecryptionFailed)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &self.bytes)
            .map_err(|_| Error::Internal("invalid encryption key".into()))?;
        let key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut buf = rest.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| Error::DecryptionFailed)?;
        Ok(plaintext.to_vec())
    }
}
