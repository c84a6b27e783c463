//! Shared-key request signing for the Log Analytics Data Collector API.
//!
//! The signature is a base64 HMAC-SHA256, keyed by the base64-decoded
//! workspace key, over the canonical string
//!
//! ```text
//! POST\n{content_length}\napplication/json\nx-ms-date:{date}\n/api/logs
//! ```
//!
//! Every component must match the request that is actually sent, character
//! for character, or the service rejects it with 403.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNED_METHOD: &str = "POST";
pub const SIGNED_CONTENT_TYPE: &str = "application/json";
pub const SIGNED_DATE_HEADER: &str = "x-ms-date";
pub const SIGNED_RESOURCE: &str = "/api/logs";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Shared key is empty")]
    EmptyKey,
    #[error("Shared key is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("Shared key rejected by HMAC: {0}")]
    InvalidKey(String),
}

/// Builds the string that gets hashed for one request.
pub fn canonical_string(content_length: usize, date: &str) -> String {
    format!(
        "{SIGNED_METHOD}\n{content_length}\n{SIGNED_CONTENT_TYPE}\n{SIGNED_DATE_HEADER}:{date}\n{SIGNED_RESOURCE}"
    )
}

/// RFC1123 date in GMT, as expected in the `x-ms-date` header.
pub fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn authorization_header(workspace_id: &str, signature: &str) -> String {
    format!("SharedKey {workspace_id}:{signature}")
}

/// Signs one request with a base64 shared key.
///
/// Pure convenience wrapper; long-lived callers should build a
/// [`SharedKeySigner`] once so that key decoding happens at startup.
pub fn sign(
    content_length: usize,
    date: &str,
    shared_key_base64: &str,
) -> Result<String, SignatureError> {
    Ok(SharedKeySigner::new(shared_key_base64)?.sign(content_length, date))
}

/// Holds an HMAC keyed with the decoded shared key.
#[derive(Clone)]
pub struct SharedKeySigner {
    mac: HmacSha256,
}

impl SharedKeySigner {
    pub fn new(shared_key_base64: &str) -> Result<Self, SignatureError> {
        let trimmed = shared_key_base64.trim();
        if trimmed.is_empty() {
            return Err(SignatureError::EmptyKey);
        }

        let key = BASE64_STANDARD
            .decode(trimmed)
            .map_err(|e| SignatureError::InvalidBase64(e.to_string()))?;
        if key.is_empty() {
            return Err(SignatureError::EmptyKey);
        }

        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    pub fn sign(&self, content_length: usize, date: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical_string(content_length, date).as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("mac", &"<redacted>")
            .finish()
    }
}
