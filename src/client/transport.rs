//! HTTP access to the ingestion service.

use crate::client::envelope::{BearerCredential, UploadEnvelope};
use crate::common::config::ClientConfig;
use crate::contract::{ErrorResponse, PublicKeyResponse};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

/// The two network operations the client performs.
///
/// Implementations must not retry on their own; a failed call is reported to
/// the caller as-is.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches the PEM text of the server public key.
    async fn fetch_public_key(&self) -> Result<String>;

    /// Sends one envelope, authorized with `credential`.
    async fn upload(&self, envelope: UploadEnvelope, credential: &BearerCredential) -> Result<()>;
}

/// `reqwest`-backed [`Transport`].
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_public_key(&self) -> Result<String> {
        let url = self.config.public_key_url();
        debug!(%url, "fetching server public key");

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::KeyUnavailable(format!(
                "public key endpoint returned {status}"
            )));
        }

        let body: PublicKeyResponse = resp
            .json()
            .await
            .map_err(|e| Error::KeyUnavailable(format!("public key response parse error: {e}")))?;
        Ok(body.public_key)
    }

    async fn upload(&self, envelope: UploadEnvelope, credential: &BearerCredential) -> Result<()> {
        let url = self.config.upload_url();
        let form = envelope.into_form()?;

        let resp = self
            .client
            .post(&url)
            .bearer_auth(credential.token())
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(%url, %status, "upload accepted");
            return Ok(());
        }

        let body = resp.bytes().await.unwrap_or_default();
        let detail = serde_json::from_slice::<ErrorResponse>(&body)
            .ok()
            .and_then(|r| r.detail_text());
        warn!(%url, %status, detail = detail.as_deref().unwrap_or(""), "upload rejected");

        Err(Error::Transport {
            status: Some(status.as_u16()),
            detail,
            message: format!("server responded with {status}"),
        })
    }
}
