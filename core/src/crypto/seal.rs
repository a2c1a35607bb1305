//! Authenticated symmetric sealing of message payloads (AES-256-GCM)

use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nonce length prefixed to every sealed payload
const NONCE_LEN: usize = 12;

/// Symmetric channel key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
#[cbor(transparent)]
pub struct SealKey(#[b(0)] pub [u8; 32]);

impl SealKey {
    /// Generate a fresh random key
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealKey(..)")
    }
}

/// Seal a plaintext payload: random nonce followed by ciphertext+tag
pub fn seal(key: &SealKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    use rand::RngCore;

    let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key.0));
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Crypto("failed to seal payload".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed payload. Fails closed on truncation or tamper.
pub fn open(key: &SealKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(Error::SealOpen);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::SealOpen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = SealKey::random();
        let plaintext = b"concurrent edits converge";

        let sealed = seal(&key, plaintext).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], plaintext.as_slice());

        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_payload_fails_closed() {
        let key = SealKey::random();
        let mut sealed = seal(&key, b"payload").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(matches!(open(&key, &sealed), Err(Error::SealOpen)));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = seal(&SealKey::random(), b"payload").unwrap();
        assert!(matches!(open(&SealKey::random(), &sealed), Err(Error::SealOpen)));
    }

    #[test]
    fn truncated_payload_fails_closed() {
        let key = SealKey::random();
        assert!(matches!(open(&key, &[0u8; 4]), Err(Error::SealOpen)));
    }
}
