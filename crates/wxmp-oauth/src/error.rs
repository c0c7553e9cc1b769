//! Error types for credential management and platform calls.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, WxError>;

/// Platform code signalling that the access credential is no longer accepted.
pub const INVALID_CREDENTIAL_CODE: i64 = 40001;

/// Message fragment that accompanies [`INVALID_CREDENTIAL_CODE`] on invalidation.
pub const INVALID_CREDENTIAL_MESSAGE: &str = "access_token is invalid";

/// Errors that can occur while talking to the platform.
#[derive(Debug, thiserror::Error)]
pub enum WxError {
    /// Client identity missing or malformed.
    #[error("Config error: {0}")]
    Config(String),

    /// Credential refresh failed or returned an unusable value.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The platform answered with a structured error.
    #[error("Platform error {code}: {message}")]
    Platform {
        code: i64,
        message: String,
        /// Diagnostic entry written for this failure, if any.
        log_id: Option<String>,
    },

    /// Network or timeout failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Callback missing required parameters or authorization refused.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Config store or diagnostic log failure.
    #[error("Store error: {0}")]
    Store(#[from] wxmp_store::StoreError),

    /// Response body was not the expected JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed input (bad URL, undecodable redirect target).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl WxError {
    /// Whether this is the platform's credential-invalidation signal.
    pub fn is_credential_invalid(&self) -> bool {
        match self {
            WxError::Platform { code, message, .. } => is_invalidation(*code, Some(message)),
            _ => false,
        }
    }

    /// Diagnostic entry id attached to a platform error.
    pub fn log_id(&self) -> Option<&str> {
        match self {
            WxError::Platform { log_id, .. } => log_id.as_deref(),
            _ => None,
        }
    }
}

/// Code and message both have to match; the code alone is reused for other failures.
pub(crate) fn is_invalidation(code: i64, message: Option<&str>) -> bool {
    code == INVALID_CREDENTIAL_CODE
        && message.is_some_and(|m| m.contains(INVALID_CREDENTIAL_MESSAGE))
}

impl From<reqwest::Error> for WxError {
    fn from(e: reqwest::Error) -> Self {
        WxError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for WxError {
    fn from(e: serde_json::Error) -> Self {
        WxError::Serialization(e.to_string())
    }
}
