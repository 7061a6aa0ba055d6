//! Affinity key encoding and protection.
//!
//! Wire format: base64url (no padding) of either the raw destination id, or,
//! when a protection key is configured, `nonce (12 bytes) || AES-256-GCM
//! ciphertext` of the id.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

use crate::config::schema::SessionAffinityOptions;

const NONCE_LEN: usize = 12;

/// Errors raised while building a protector or decoding a key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AffinityKeyError {
    #[error("protection key is not valid base64: {0}")]
    InvalidProtectionKey(String),
    #[error("protection key must be 32 bytes, got {0}")]
    ProtectionKeyLength(usize),
    #[error("affinity key is not valid base64url")]
    Encoding,
    #[error("affinity key could not be decrypted")]
    Decryption,
    #[error("affinity key is not valid UTF-8")]
    Utf8,
    #[error("affinity key encryption failed")]
    Encryption,
}

/// Turns destination ids into opaque affinity keys and back.
#[derive(Clone)]
pub enum KeyProtector {
    /// base64url only.
    Encoded,
    /// base64url over AES-256-GCM.
    Encrypted(Aes256Gcm),
}

impl std::fmt::Debug for KeyProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoded => f.write_str("KeyProtector::Encoded"),
            Self::Encrypted(_) => f.write_str("KeyProtector::Encrypted(..)"),
        }
    }
}

impl Default for KeyProtector {
    fn default() -> Self {
        Self::Encoded
    }
}

impl KeyProtector {
    /// Build from the process-wide options.
    pub fn from_options(options: &SessionAffinityOptions) -> Result<Self, AffinityKeyError> {
        match &options.protection_key {
            Some(key) => Self::with_key(key),
            None => Ok(Self::Encoded),
        }
    }

    /// Build an encrypting protector from a base64 (standard) 32-byte key.
    pub fn with_key(key_b64: &str) -> Result<Self, AffinityKeyError> {
        let key = general_purpose::STANDARD
            .decode(key_b64.trim())
            .map_err(|e| AffinityKeyError::InvalidProtectionKey(e.to_string()))?;
        if key.len() != 32 {
            return Err(AffinityKeyError::ProtectionKeyLength(key.len()));
        }
        Ok(Self::Encrypted(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))))
    }

    /// Encode a destination id into a key.
    pub fn protect(&self, destination_id: &str) -> Result<String, AffinityKeyError> {
        let bytes = match self {
            Self::Encoded => destination_id.as_bytes().to_vec(),
            Self::Encrypted(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, destination_id.as_bytes())
                    .map_err(|_| AffinityKeyError::Encryption)?;
                let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&ciphertext);
                out
            }
        };
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a key back into a destination id.
    pub fn unprotect(&self, key: &str) -> Result<String, AffinityKeyError> {
        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(key.trim())
            .map_err(|_| AffinityKeyError::Encoding)?;
        let plain = match self {
            Self::Encoded => bytes,
            Self::Encrypted(cipher) => {
                if bytes.len() <= NONCE_LEN {
                    return Err(AffinityKeyError::Decryption);
                }
                let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
                    .map_err(|_| AffinityKeyError::Decryption)?
            }
        };
        String::from_utf8(plain).map_err(|_| AffinityKeyError::Utf8)
    }
}
