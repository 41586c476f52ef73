// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session credentials: HS256 JWTs carrying an encrypted nonce block.
//!
//! The signed payload holds `{user_id, email, nonce, iat, exp}`. The nonce
//! is an AES-256-GCM ciphertext (key derived from `NONCE_SECRET`) of
//! `{userId, sessionId, tier, timestamp}`, so the session id and tier
//! snapshot are opaque to anyone holding the token.
//!
//! Every verification failure is reported as [`AppError::InvalidToken`],
//! whether the signature, the expiry, or the nonce was at fault.

use crate::error::AppError;
use crate::models::Tier;
use crate::services::encryption::{CryptoError, EncryptedSecret, EncryptionService};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Lifetime of an issued credential.
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Remaining lifetime below which a credential is renewed.
pub const RENEWAL_THRESHOLD_SECS: i64 = 60 * 60;

/// Maximum nonce age, independent of the outer `exp`.
pub const NONCE_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Tolerated clock skew for nonce timestamps in the future.
const NONCE_FUTURE_SKEW_MS: i64 = 60 * 1000;

/// HKDF info for the nonce key.
const NONCE_KEY_INFO: &[u8] = b"session-nonce";

/// Identity carried by a verified session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: String,
    pub email: String,
    pub session_id: String,
    /// Snapshot at issue time. Advisory only; entitlement decisions re-read
    /// the user record.
    pub tier: Tier,
}

/// Signed JWT payload.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    user_id: String,
    email: String,
    nonce: String,
    iat: i64,
    exp: i64,
}

/// Plaintext of the encrypted nonce.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NonceBlock {
    user_id: String,
    session_id: String,
    tier: Tier,
    /// Issue time in Unix milliseconds
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ExpiryOnly {
    exp: i64,
}

/// Issues, verifies and renews session credentials.
#[derive(Clone)]
pub struct SessionTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    nonce_crypto: EncryptionService,
}

impl SessionTokenService {
    pub fn new(jwt_secret: &[u8], nonce_secret: &[u8]) -> Result<Self, CryptoError> {
        if jwt_secret.is_empty() {
            return Err(CryptoError::InvalidKey("JWT secret is empty".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(jwt_secret),
            decoding_key: DecodingKey::from_secret(jwt_secret),
            nonce_crypto: EncryptionService::derive_from_secret(nonce_secret, NONCE_KEY_INFO)?,
        })
    }

    /// Issue a credential valid for 24 hours from now.
    pub fn issue(&self, claims: &SessionClaims) -> Result<String, AppError> {
        self.issue_at(claims, Utc::now())
    }

    pub fn issue_at(&self, claims: &SessionClaims, now: DateTime<Utc>) -> Result<String, AppError> {
        let nonce = NonceBlock {
            user_id: claims.user_id.clone(),
            session_id: claims.session_id.clone(),
            tier: claims.tier,
            timestamp: now.timestamp_millis(),
        };
        let iat = now.timestamp();
        self.sign(&claims.user_id, &claims.email, &nonce, iat, iat + SESSION_TTL_SECS)
    }

    /// Verify a credential against the current time.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AppError> {
        self.check(token, now).map_err(|reason| {
            tracing::debug!(reason, "Rejected session credential");
            AppError::InvalidToken
        })
    }

    /// Re-issue the credential if it expires within the renewal threshold.
    ///
    /// Returns `Ok(None)` when no renewal is due. The old credential stays
    /// valid until its own expiry.
    pub fn renew_if_needed(&self, token: &str) -> Result<Option<String>, AppError> {
        self.renew_if_needed_at(token, Utc::now())
    }

    pub fn renew_if_needed_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AppError> {
        let remaining = self.peek_expiry(token)? - now.timestamp();
        if remaining >= RENEWAL_THRESHOLD_SECS {
            return Ok(None);
        }

        let claims = self.verify_at(token, now)?;
        let renewed = self.issue_at(&claims, now)?;
        tracing::debug!(user_id = %claims.user_id, remaining, "Renewed session credential");
        Ok(Some(renewed))
    }

    /// Read `exp` without checking the signature.
    pub fn peek_expiry(&self, token: &str) -> Result<i64, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        decode::<ExpiryOnly>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims.exp)
            .map_err(|_| AppError::InvalidToken)
    }

    fn sign(
        &self,
        user_id: &str,
        email: &str,
        nonce: &NonceBlock,
        iat: i64,
        exp: i64,
    ) -> Result<String, AppError> {
        let plaintext = serde_json::to_vec(nonce)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Nonce serialization failed: {}", e)))?;
        let sealed = self
            .nonce_crypto
            .encrypt(&plaintext)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Nonce encryption failed: {}", e)))?;

        let claims = TokenClaims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            nonce: sealed.to_compact(),
            iat,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT signing failed: {}", e)))
    }

    fn check(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, &'static str> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against `now` below.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| "signature or structure")?
            .claims;

        if claims.exp <= now.timestamp() {
            return Err("expired");
        }

        let sealed = EncryptedSecret::from_compact(&claims.nonce).map_err(|_| "nonce format")?;
        let plaintext = self
            .nonce_crypto
            .decrypt(&sealed)
            .map_err(|_| "nonce decryption")?;
        let nonce: NonceBlock = serde_json::from_slice(&plaintext).map_err(|_| "nonce payload")?;

        if nonce.user_id != claims.user_id {
            return Err("nonce user mismatch");
        }

        let age_ms = now.timestamp_millis() - nonce.timestamp;
        if age_ms > NONCE_MAX_AGE_MS || age_ms < -NONCE_FUTURE_SKEW_MS {
            return Err("nonce age");
        }

        Ok(SessionClaims {
            user_id: claims.user_id,
            email: claims.email,
            session_id: nonce.session_id,
            tier: nonce.tier,
        })
    }
}
