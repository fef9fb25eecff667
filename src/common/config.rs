//!
//! # 客户端配置模块
//!
//! Endpoints, limits and timeouts used by the transmit client. Values come
//! from the built-in defaults, an optional JSON file, and `PLANT_SEAL_*`
//! environment variables, in that order of precedence (lowest first).
//!
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PLANT_SEAL_";

/// Payloads above this size are kept out of any user-visible preview.
pub const DEFAULT_DISPLAY_THRESHOLD: usize = 1024 * 1024;

/// Largest payload accepted by acquisition.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the ingestion service.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Path of the public key endpoint.
    #[serde(default = "default_public_key_path")]
    pub public_key_path: String,
    /// Path of the multipart upload endpoint.
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_display_threshold")]
    pub display_threshold_bytes: usize,
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_public_key_path() -> String {
    "/auth/public-key".to_string()
}

fn default_upload_path() -> String {
    "/api/ingest/secure".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_display_threshold() -> usize {
    DEFAULT_DISPLAY_THRESHOLD
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            public_key_path: default_public_key_path(),
            upload_path: default_upload_path(),
            request_timeout_secs: default_request_timeout_secs(),
            display_threshold_bytes: DEFAULT_DISPLAY_THRESHOLD,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ClientConfig {
    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Applies `PLANT_SEAL_*` overrides from the process environment.
    pub fn from_env(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides resolved through `lookup`, which receives the full
    /// variable name (e.g. `PLANT_SEAL_API_URL`).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(value) = var("API_URL") {
            self.api_url = value;
        }
        if let Some(value) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = var("DISPLAY_THRESHOLD") {
            self.display_threshold_bytes = parse_number("DISPLAY_THRESHOLD", &value)?;
        }
        if let Some(value) = var("MAX_PAYLOAD_BYTES") {
            self.max_payload_bytes = parse_number("MAX_PAYLOAD_BYTES", &value)?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("api_url must not be empty".into()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "api_url must be an http(s) URL, got {}",
                self.api_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        if self.display_threshold_bytes > self.max_payload_bytes {
            return Err(Error::Config(
                "display_threshold_bytes must not exceed max_payload_bytes".into(),
            ));
        }
        Ok(())
    }

    pub fn public_key_url(&self) -> String {
        join_url(&self.api_url, &self.public_key_path)
    }

    pub fn upload_url(&self) -> String {
        join_url(&self.api_url, &self.upload_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{ENV_PREFIX}{name} is not a valid number: {value}")))
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
