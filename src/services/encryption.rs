// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Symmetric authenticated encryption (AES-256-GCM) for opaque secrets.
//!
//! Used for the stored refresh credentials and for the nonce block embedded
//! in session tokens. Every call to [`EncryptionService::encrypt`] draws a
//! fresh random 96-bit IV from the system CSPRNG; IVs are never derived from
//! a counter.
//!
//! Callers may bind a ciphertext to a context (e.g. the owning user) with
//! additional authenticated data. Decryption with a different context fails
//! exactly like a tampered ciphertext.

use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the GCM authentication tag in bytes.
const TAG_LEN: usize = 16;

/// Salt for deriving keys from free-form secrets.
const HKDF_SALT: &[u8] = b"docgate-key-derivation-v1";

/// Errors from the encryption primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Authentication tag did not verify, or the input was malformed.
    #[error("ciphertext failed integrity check")]
    Integrity,

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,
}

/// Encrypted secret as `{iv, ciphertext, authTag}`, all hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub iv: String,
    pub ciphertext: String,
    #[serde(rename = "authTag")]
    pub auth_tag: String,
}

impl EncryptedSecret {
    /// Serialize into the single text field used by the record store.
    pub fn to_field(&self) -> String {
        // Serializing three plain strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse the single text field used by the record store.
    pub fn from_field(field: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(field).map_err(|_| CryptoError::Integrity)
    }

    /// Compact `iv:ciphertext:authTag` form for embedding in tokens.
    pub fn to_compact(&self) -> String {
        format!("{}:{}:{}", self.iv, self.ciphertext, self.auth_tag)
    }

    pub fn from_compact(s: &str) -> Result<Self, CryptoError> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(iv), Some(ciphertext), Some(tag), None) => Ok(Self {
                iv: iv.to_string(),
                ciphertext: ciphertext.to_string(),
                auth_tag: tag.to_string(),
            }),
            _ => Err(CryptoError::Integrity),
        }
    }
}

/// AES-256-GCM encryption service bound to one key.
#[derive(Clone)]
pub struct EncryptionService {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").finish_non_exhaustive()
    }
}

impl EncryptionService {
    /// Create a service from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }

        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".to_string()))?;

        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Derive a key from an arbitrary-length secret with HKDF-SHA256.
    ///
    /// `info` separates keys derived from the same secret for different uses.
    pub fn derive_from_secret(secret: &[u8], info: &[u8]) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::InvalidKey("secret is empty".to_string()));
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret);
        let mut okm = [0u8; KEY_LEN];
        hk.expand(info, &mut okm)
            .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand failed: {}", e)))?;

        Self::new(&okm)
    }

    /// Encrypt plaintext with no associated data.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedSecret, CryptoError> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// Decrypt a secret that was encrypted with no associated data.
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Vec<u8>, CryptoError> {
        self.decrypt_with_aad(secret, &[])
    }

    /// Encrypt plaintext, binding it to `aad`.
    pub fn encrypt_with_aad(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<EncryptedSecret, CryptoError> {
        let mut iv = [0u8; NONCE_LEN];
        self.rng.fill(&mut iv).map_err(|_| CryptoError::Encrypt)?;

        let mut in_out = plaintext.to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(iv),
                Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(EncryptedSecret {
            iv: hex::encode(iv),
            ciphertext: hex::encode(&in_out),
            auth_tag: hex::encode(tag.as_ref()),
        })
    }

    /// Decrypt a secret, verifying it against `aad`.
    ///
    /// Any malformed field or tag mismatch yields [`CryptoError::Integrity`];
    /// corrupted plaintext is never returned.
    pub fn decrypt_with_aad(
        &self,
        secret: &EncryptedSecret,
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let iv = hex::decode(&secret.iv).map_err(|_| CryptoError::Integrity)?;
        let tag = hex::decode(&secret.auth_tag).map_err(|_| CryptoError::Integrity)?;
        let mut buf = hex::decode(&secret.ciphertext).map_err(|_| CryptoError::Integrity)?;

        if tag.len() != TAG_LEN {
            return Err(CryptoError::Integrity);
        }

        let nonce = Nonce::try_assume_unique_for_key(&iv).map_err(|_| CryptoError::Integrity)?;

        buf.extend_from_slice(&tag);
        let plaintext_len = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut buf)
            .map_err(|_| CryptoError::Integrity)?
            .len();

        buf.truncate(plaintext_len);
        Ok(buf)
    }

    /// Encrypt a UTF-8 string.
    pub fn encrypt_str(&self, plaintext: &str, aad: &[u8]) -> Result<EncryptedSecret, CryptoError> {
        self.encrypt_with_aad(plaintext.as_bytes(), aad)
    }

    /// Decrypt into a UTF-8 string. Invalid UTF-8 counts as an integrity failure.
    pub fn decrypt_str(&self, secret: &EncryptedSecret, aad: &[u8]) -> Result<String, CryptoError> {
        let bytes = self.decrypt_with_aad(secret, aad)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Integrity)
    }
}
