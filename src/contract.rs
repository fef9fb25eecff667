//! Defines the data structures exchanged with the ingestion service.
use serde::{Deserialize, Serialize};

/// Multipart field carrying the (unverified) plant identity.
pub const FIELD_PLANT_EMAIL: &str = "plant_email";
/// Multipart field carrying the base64 RSA-OAEP wrapped data key.
pub const FIELD_ENCRYPTED_KEY: &str = "encrypted_aes_key";
/// Multipart field carrying the base64 GCM nonce.
pub const FIELD_IV: &str = "iv";
/// Binary multipart part carrying ciphertext and tag.
pub const FIELD_FILE: &str = "file";
/// Optional label for document payloads.
pub const FIELD_DATA_TYPE: &str = "data_type";

pub const CIPHERTEXT_CONTENT_TYPE: &str = "application/octet-stream";
pub const CIPHERTEXT_FILE_NAME: &str = "payload.bin";

/// Body of the public key endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyResponse {
    /// The PEM-encoded RSA public key.
    pub public_key: String,
}

/// Body of a rejected request. FastAPI puts either a message string or a
/// list of validation errors in `detail`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ErrorResponse {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// The detail as display text: strings verbatim, anything else as compact JSON.
    pub fn detail_text(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
