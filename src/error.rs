//! Defines the custom error type for the `plant-seal` crate.

use thiserror::Error;

/// The main error type for the `plant-seal` crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The server public key was never fetched, or the fetch failed.
    #[error("server public key is unavailable: {0}")]
    KeyUnavailable(String),

    #[error("no payload selected")]
    NoPayloadSelected,

    #[error("payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { actual: u64, limit: u64 },

    #[error("invalid document payload: {0}")]
    InvalidDocument(String),

    /// The secure random source failed. Never substituted.
    #[error("secure random source failed: {0}")]
    RandomSourceFailure(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Network failure or a non-2xx response from the ingestion service.
    #[error("transport failure: {}", .detail.as_deref().unwrap_or(.message.as_str()))]
    Transport {
        status: Option<u16>,
        detail: Option<String>,
        message: String,
    },

    #[error("a transmission is already in progress ({0})")]
    Busy(&'static str),

    #[error("invalid bearer credential: {0}")]
    InvalidCredential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoding from Base64 failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport {
            status: err.status().map(|s| s.as_u16()),
            detail: None,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
