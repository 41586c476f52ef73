// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Every secret is read exactly once at startup. A missing or malformed
//! secret is a [`ConfigError`] and the process must not start serving.

use std::env;

/// Default number of distinct documents a free-tier user may open.
pub const DEFAULT_FREE_TIER_DOCUMENT_LIMIT: u32 = 20;

/// Listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8080;

/// Which record store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::Invalid {
                name: "RECORD_STORE",
                reason: format!("unknown backend '{}'", s),
            }),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Google OAuth client ID (also the expected ID-token audience)
    pub google_client_id: String,
    /// Redirect URI registered with Google for the code exchange
    pub google_redirect_uri: String,
    /// Origin of the browser extension allowed by CORS
    pub extension_origin: String,
    /// Default Stripe price for checkout sessions
    pub stripe_price_id: Option<String>,
    /// Distinct documents a free-tier user may open
    pub free_tier_document_limit: u32,
    /// Record store backend
    pub record_store: StoreBackend,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// HS256 signing key for session credentials (raw bytes)
    pub jwt_secret: Vec<u8>,
    /// Secret the nonce-encryption key is derived from (raw bytes)
    pub nonce_secret: Vec<u8>,
    /// AES-256-GCM key protecting stored refresh credentials
    pub encryption_key: [u8; 32],
    /// Stripe API secret key
    pub stripe_secret_key: String,
    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,
}

impl Config {
    /// Deterministic config for tests only.
    pub fn test_default() -> Self {
        Self {
            google_client_id: "test-client-id.apps.googleusercontent.com".to_string(),
            google_redirect_uri: "http://localhost:8080/auth/google/callback".to_string(),
            extension_origin: "chrome-extension://testextensionid".to_string(),
            stripe_price_id: Some("price_test".to_string()),
            free_tier_document_limit: DEFAULT_FREE_TIER_DOCUMENT_LIMIT,
            record_store: StoreBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            port: DEFAULT_PORT,
            google_client_secret: "test_google_secret".to_string(),
            jwt_secret: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            nonce_secret: b"test_nonce_secret".to_vec(),
            encryption_key: [7u8; 32],
            stripe_secret_key: "sk_test_123".to_string(),
            stripe_webhook_secret: "whsec_test_secret".to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honoured for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            google_client_id: required("GOOGLE_CLIENT_ID")?,
            google_redirect_uri: required("GOOGLE_REDIRECT_URI")?,
            extension_origin: env::var("EXTENSION_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            stripe_price_id: env::var("STRIPE_PRICE_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            free_tier_document_limit: match env::var("FREE_TIER_DOCUMENT_LIMIT") {
                Ok(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                    name: "FREE_TIER_DOCUMENT_LIMIT",
                    reason: "must be a non-negative integer".to_string(),
                })?,
                Err(_) => DEFAULT_FREE_TIER_DOCUMENT_LIMIT,
            },
            record_store: env::var("RECORD_STORE")
                .unwrap_or_else(|_| "firestore".to_string())
                .parse()?,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: parse_port(env::var("PORT").ok().as_deref())?,

            google_client_secret: required("GOOGLE_CLIENT_SECRET")?,
            jwt_secret: required("JWT_SECRET")?.into_bytes(),
            nonce_secret: required("NONCE_SECRET")?.into_bytes(),
            encryption_key: parse_encryption_key(&required("ENCRYPTION_KEY")?)?,
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
        })
    }
}

/// Read a required, non-empty variable.
fn required(name: &'static str) -> Result<String, ConfigError> {
    let value = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing(name));
    }
    Ok(value.to_string())
}

/// Parse `PORT`, defaulting to 8080 when unset. A value that is set but
/// not a usable port is an error rather than a silent fallback.
pub fn parse_port(value: Option<&str>) -> Result<u16, ConfigError> {
    let Some(value) = value else {
        return Ok(DEFAULT_PORT);
    };
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::Invalid {
            name: "PORT",
            reason: format!("expected a port number 1-65535, got {:?}", value),
        }),
    }
}

/// Parse a 64-character hex string into a 32-byte key.
pub fn parse_encryption_key(hex_key: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| ConfigError::Invalid {
        name: "ENCRYPTION_KEY",
        reason: format!("not valid hex: {}", e),
    })?;

    bytes.try_into().map_err(|b: Vec<u8>| ConfigError::Invalid {
        name: "ENCRYPTION_KEY",
        reason: format!("expected 32 bytes, got {}", b.len()),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
