//! Server-validation handshake.
//!
//! When a callback URL is registered, the platform sends `signature`,
//! `timestamp`, `nonce` and `echostr`. The server proves it knows the shared
//! token by recomputing the signature and echoing `echostr` back.

use serde::Deserialize;
use sha1::{Digest, Sha1};

/// Body returned when the handshake fails.
pub const VALIDATION_FAILED: &str = "error";

/// Query parameters of the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationParams {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub echostr: String,
}

/// SHA-1 hex digest of `token`, `timestamp` and `nonce`, sorted and concatenated.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Whether `signature` matches the one computed from the other inputs.
pub fn verify_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    !signature.is_empty()
        && compute_signature(token, timestamp, nonce).eq_ignore_ascii_case(signature.trim())
}

/// Response body for a handshake request: `echostr` on success, `error` otherwise.
pub fn validate_server(token: &str, params: &ValidationParams) -> String {
    if verify_signature(token, &params.timestamp, &params.nonce, &params.signature) {
        params.echostr.clone()
    } else {
        tracing::warn!(timestamp = %params.timestamp, "server validation signature mismatch");
        VALIDATION_FAILED.to_string()
    }
}
