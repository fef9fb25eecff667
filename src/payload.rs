//! Payload acquisition: synthetic filler, file contents, or a JSON document.
//!
//! Every variant ends up as one in-memory [`Bytes`] buffer that is handed to the
//! sealer by reference. Files are read eagerly; streaming reads are not
//! supported.

use crate::common::config::ClientConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::path::Path;

/// Filler repeated by synthetic payloads.
pub const SYNTHETIC_PATTERN: &[u8; 16] = b"abcdef1234567890";

/// Size and display limits applied during acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadLimits {
    /// Payloads larger than this get no text preview.
    pub display_threshold: usize,
    pub max_bytes: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for PayloadLimits {
    fn from(config: &ClientConfig) -> Self {
        Self {
            display_threshold: config.display_threshold_bytes,
            max_bytes: config.max_payload_bytes,
        }
    }
}

impl PayloadLimits {
    fn check(&self, len: u64) -> Result<()> {
        if len > self.max_bytes as u64 {
            return Err(Error::PayloadTooLarge {
                actual: len,
                limit: self.max_bytes as u64,
            });
        }
        Ok(())
    }
}

/// Where a payload came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadSource {
    Synthetic,
    File { name: String },
    /// A JSON document labelled with a data type such as `production_order`.
    Document { data_type: String },
}

/// An acquired plaintext.
#[derive(Clone, Debug)]
pub struct Payload {
    bytes: Bytes,
    source: PayloadSource,
    preview: Option<String>,
}

impl Payload {
    /// Builds `size` bytes of [`SYNTHETIC_PATTERN`], truncated to the exact length.
    pub fn synthetic(size: usize, limits: &PayloadLimits) -> Result<Self> {
        limits.check(size as u64)?;
        let data = generate_synthetic(size);
        let preview = (size <= limits.display_threshold)
            .then(|| String::from_utf8_lossy(&data).into_owned());
        Ok(Self {
            bytes: Bytes::from(data),
            source: PayloadSource::Synthetic,
            preview,
        })
    }

    /// Reads the complete file at `path`.
    pub async fn from_file(path: impl AsRef<Path>, limits: &PayloadLimits) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }
        limits.check(metadata.len())?;

        let data = tokio::fs::read(path).await?;
        limits.check(data.len() as u64)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            bytes: Bytes::from(data),
            source: PayloadSource::File { name },
            preview: None,
        })
    }

    /// Accepts `text` only if it parses as JSON. The text is sent as written.
    pub fn from_document(
        data_type: impl Into<String>,
        text: impl Into<String>,
        limits: &PayloadLimits,
    ) -> Result<Self> {
        let data_type = data_type.into().trim().to_string();
        if data_type.is_empty() {
            return Err(Error::InvalidDocument("data type must not be empty".into()));
        }
        let text = text.into();
        limits.check(text.len() as u64)?;
        serde_json::from_str::<serde_json::Value>(&text)
            .map_err(|e| Error::InvalidDocument(format!("must be valid JSON: {e}")))?;

        let preview = (text.len() <= limits.display_threshold).then(|| text.clone());
        Ok(Self {
            bytes: Bytes::from(text),
            source: PayloadSource::Document { data_type },
            preview,
        })
    }

    /// The plaintext. Cloning the returned buffer does not copy the data.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn source(&self) -> &PayloadSource {
        &self.source
    }

    /// Text suitable for display, present only at or below the display threshold.
    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    /// The data type label of a document payload.
    pub fn data_type(&self) -> Option<&str> {
        match &self.source {
            PayloadSource::Document { data_type } => Some(data_type),
            _ => None,
        }
    }
}

/// Repeats [`SYNTHETIC_PATTERN`] up to exactly `size` bytes in a single allocation.
pub fn generate_synthetic(size: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(size);
    buf.extend_from_slice(&SYNTHETIC_PATTERN[..size.min(SYNTHETIC_PATTERN.len())]);
    // The filled prefix is always a whole number of patterns, so copying it
    // forward keeps the sequence intact.
    while buf.len() < size {
        let take = buf.len().min(size - buf.len());
        buf.extend_from_within(..take);
    }
    buf
}
