//! AES-GCM encryption of key material at rest.
//!
//! Ciphertext layout is `nonce (12 bytes) || GCM output`; the nonce is drawn
//! fresh from the OS RNG on every call. The master key comes from the
//! `db_encryption_key` configuration slot and its absence aborts startup.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::Error;

type Aes192Gcm = AesGcm<Aes192, aes_gcm::aead::consts::U12>;

const NONCE_LEN: usize = 12;

/// Authenticated encryption for private key bytes.
///
/// Accepts 16-, 24-, or 32-byte master keys (AES-128/192/256).
#[derive(Clone)]
pub struct Encryptor {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor")
            .field("key_bits", &(self.key.len() * 8))
            .finish()
    }
}

impl Encryptor {
    /// Build an encryptor from raw master-key bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] unless the key is 16, 24, or 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        match key.len() {
            16 | 24 | 32 => Ok(Self {
                key: Zeroizing::new(key.to_vec()),
            }),
            n => Err(Error::InvalidKey(format!(
                "master key must be 16, 24, or 32 bytes, got {n}"
            ))),
        }
    }

    /// Build an encryptor from the base64-encoded `db_encryption_key` value.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] on malformed base64 or a wrong key size.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let key = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| Error::InvalidKey(format!("master key is not valid base64: {e}")))?,
        );
        Self::new(&key)
    }

    /// Seal `plaintext`, prepending the fresh 12-byte nonce to the GCM output.
    ///
    /// # Errors
    /// Returns [`Error::Encryption`] if the cipher rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let payload = Payload::from(plaintext);
        let sealed = match self.key.len() {
            16 => Aes128Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Encryption(e.to_string()))?
                .encrypt(nonce, payload),
            24 => Aes192Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Encryption(e.to_string()))?
                .encrypt(nonce, payload),
            _ => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Encryption(e.to_string()))?
                .encrypt(nonce, payload),
        }
        .map_err(|_| Error::Encryption("AES-GCM sealing failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open `ciphertext` produced by [`Encryptor::encrypt`].
    ///
    /// # Errors
    /// Returns [`Error::Decryption`] on truncated input or an
    /// authentication-tag mismatch.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < NONCE_LEN {
            return Err(Error::Decryption(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let payload = Payload::from(sealed);
        let opened = match self.key.len() {
            16 => Aes128Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Decryption(e.to_string()))?
                .decrypt(nonce, payload),
            24 => Aes192Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Decryption(e.to_string()))?
                .decrypt(nonce, payload),
            _ => Aes256Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Decryption(e.to_string()))?
                .decrypt(nonce, payload),
        }
        .map_err(|_| Error::Decryption("AES-GCM authentication failed".to_string()))?;
        Ok(opened)
    }
}
