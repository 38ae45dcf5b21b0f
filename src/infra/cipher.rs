//! Per-user cipher for stored submission code
//!
//! ChaCha20-Poly1305 under a key derived from the user's profile email.
//! Layout of an encrypted value: `base64(nonce || ciphertext)`, the
//! ciphertext carrying the Poly1305 tag at its end.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_DOMAIN: &[u8] = b"fgpe-submission-key-v2";
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Encrypted value is not valid base64")]
    Encoding,

    #[error("Encrypted value is truncated")]
    Truncated,

    #[error("Encrypted value was not produced with this key")]
    Authentication,

    #[error("Decrypted value is not valid UTF-8")]
    Utf8,

    #[error("Cipher failure: {0}")]
    Cipher(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct UserKey([u8; 32]);

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserKey(..)")
    }
}

impl UserKey {
    pub fn from_email(email: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(email.trim().to_lowercase().as_bytes());
        let result = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result);
        Self(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.seal(plaintext, &nonce)
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError::Encoding)?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Truncated);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    fn seal(&self, plaintext: &str, nonce: &[u8; NONCE_SIZE]) -> Result<String, CipherError> {
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|e| CipherError::Cipher(e.to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        raw.extend_from_slice(nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(raw))
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305, CipherError> {
        ChaCha20Poly1305::new_from_slice(&self.0).map_err(|e| CipherError::Cipher(e.to_string()))
    }
}
