use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid table prefix: {0}")]
    InvalidPrefix(String),

    #[error("Malformed diagnostic id: {0}")]
    MalformedId(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
