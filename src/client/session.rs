//! The transmit session: a state machine that drives one transmission at a time.
//!
//! ```text
//! Idle -> GeneratingPayload -> Encrypting -> Uploading -> Success
//!              |                   |             |
//!              +-------------------+-------------+------> Error
//! ```
//!
//! Transitions only happen in response to commands (`select_*`, `transmit`).
//! `Success` and `Error` fall back to `Idle` on the next command. Pipeline
//! failures never escape as `Err`; they become the `Error` state.

use crate::client::envelope::{BearerCredential, UploadEnvelope};
use crate::client::provider::RemoteKeyProvider;
use crate::client::transport::{HttpTransport, Transport};
use crate::common::config::ClientConfig;
use crate::error::{Error, Result};
use crate::payload::{Payload, PayloadLimits};
use crate::sealer::{HybridSealer, SealedPayload, ServerPublicKey};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Synthetic size selected when a session starts.
pub const DEFAULT_SYNTHETIC_SIZE: usize = 1024;

/// What the next transmission will send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadSelection {
    Synthetic { size: usize },
    /// File-upload mode; `path` stays `None` until a file is chosen.
    File { path: Option<PathBuf> },
    Document { data_type: String, body: String },
}

/// Why a transmission ended in the `Error` state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureCause {
    KeyUnavailable,
    /// No payload was selected, or it could not be acquired.
    NoPayload,
    EncryptionFailure,
    UploadFailure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub cause: FailureCause,
    /// Human-readable message for the operator.
    pub message: String,
    /// Server-supplied rejection detail, verbatim.
    pub detail: Option<String>,
    pub encryption: Option<Duration>,
    pub total: Duration,
}

/// Timings of a successful transmission. Observability only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TransmissionMetrics {
    pub payload_bytes: usize,
    /// Key, nonce and ciphertext bytes sent.
    pub envelope_bytes: usize,
    pub encryption: Duration,
    pub total: Duration,
}

impl TransmissionMetrics {
    pub fn overhead_bytes(&self) -> usize {
        self.envelope_bytes.saturating_sub(self.payload_bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    GeneratingPayload,
    Encrypting,
    Uploading,
    Success(TransmissionMetrics),
    Error(SessionFailure),
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::GeneratingPayload => "generating-payload",
            SessionStatus::Encrypting => "encrypting",
            SessionStatus::Uploading => "uploading",
            SessionStatus::Success(_) => "success",
            SessionStatus::Error(_) => "error",
        }
    }

    /// Whether a transmission is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionStatus::GeneratingPayload | SessionStatus::Encrypting | SessionStatus::Uploading
        )
    }
}

struct Failed {
    cause: FailureCause,
    error: Error,
    encryption: Option<Duration>,
}

impl Failed {
    fn new(cause: FailureCause, error: Error, encryption: Option<Duration>) -> Self {
        Self {
            cause,
            error,
            encryption,
        }
    }
}

/// The routine run on the blocking pool to seal a payload.
type SealFn = Arc<dyn Fn(&HybridSealer, &[u8]) -> Result<SealedPayload> + Send + Sync>;

/// Resets a still-busy status to `Idle` when a transmit future is dropped.
struct InFlight<'a> {
    status: &'a watch::Sender<SessionStatus>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.status.send_if_modified(|status| {
            if !status.is_busy() {
                return false;
            }
            info!(status = status.name(), "transmission dropped mid-flight");
            *status = SessionStatus::Idle;
            true
        });
    }
}

/// One operator session against the ingestion service.
pub struct TransmitSession {
    keys: Arc<RemoteKeyProvider>,
    transport: Arc<dyn Transport>,
    credential: BearerCredential,
    limits: PayloadLimits,
    selection: PayloadSelection,
    status: watch::Sender<SessionStatus>,
    seal: SealFn,
}

impl TransmitSession {
    pub fn new(
        keys: Arc<RemoteKeyProvider>,
        transport: Arc<dyn Transport>,
        credential: BearerCredential,
        limits: PayloadLimits,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            keys,
            transport,
            credential,
            limits,
            selection: PayloadSelection::Synthetic {
                size: DEFAULT_SYNTHETIC_SIZE,
            },
            status,
            seal: Arc::new(|sealer: &HybridSealer, plaintext: &[u8]| sealer.seal(plaintext)),
        }
    }

    /// Replaces the seal routine, e.g. to drive it from a scripted RNG.
    #[cfg(test)]
    pub(crate) fn with_seal_fn<F>(mut self, seal: F) -> Self
    where
        F: Fn(&HybridSealer, &[u8]) -> Result<SealedPayload> + Send + Sync + 'static,
    {
        self.seal = Arc::new(seal);
        self
    }

    /// Starts a session over HTTP and fetches the server public key once.
    ///
    /// A failed key fetch does not fail the session; it stays usable but every
    /// transmission is refused until [`TransmitSession::refresh_public_key`]
    /// succeeds.
    pub async fn connect(config: &ClientConfig, token: &str) -> Result<Self> {
        let credential = BearerCredential::parse(token)?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.clone())?);
        let keys = Arc::new(RemoteKeyProvider::new(transport.clone()));
        let session = Self::new(keys, transport, credential, PayloadLimits::from(config));
        // Failure is already logged by the provider and surfaces on transmit.
        let _ = session.keys.fetch_public_key().await;
        Ok(session)
    }

    /// Retries the public key fetch. A no-op once a key is cached.
    pub async fn refresh_public_key(&self) -> Result<Arc<ServerPublicKey>> {
        self.ensure_ready()?;
        self.keys.fetch_public_key().await
    }

    pub fn has_public_key(&self) -> bool {
        self.keys.is_available()
    }

    pub fn credential(&self) -> &BearerCredential {
        &self.credential
    }

    pub fn selection(&self) -> &PayloadSelection {
        &self.selection
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn select_size(&mut self, size: usize) -> Result<()> {
        self.select(PayloadSelection::Synthetic { size })
    }

    /// Switches to file-upload mode without a file chosen yet.
    pub fn select_file_mode(&mut self) -> Result<()> {
        self.select(PayloadSelection::File { path: None })
    }

    pub fn select_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.select(PayloadSelection::File {
            path: Some(path.into()),
        })
    }

    pub fn select_document(
        &mut self,
        data_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<()> {
        self.select(PayloadSelection::Document {
            data_type: data_type.into(),
            body: body.into(),
        })
    }

    fn select(&mut self, selection: PayloadSelection) -> Result<()> {
        self.ensure_ready()?;
        debug!(?selection, "payload selected");
        self.selection = selection;
        self.set_status(SessionStatus::Idle);
        Ok(())
    }

    /// Forces the session back to `Idle`, e.g. after a transmit future was
    /// dropped mid-flight.
    pub fn abort(&mut self) {
        if self.status.borrow().is_busy() {
            info!("transmission aborted");
        }
        self.set_status(SessionStatus::Idle);
    }

    /// Runs one transmission to completion and returns the final status.
    ///
    /// Returns `Err` only when a transmission is already in flight.
    pub async fn transmit(&mut self) -> Result<SessionStatus> {
        self.transmit_until(std::future::pending::<()>()).await
    }

    /// Like [`TransmitSession::transmit`], but abandons the transmission when
    /// `cancel` completes first. A cancelled transmission ends in `Idle` and its
    /// envelope is discarded. Dropping the returned future has the same effect.
    pub async fn transmit_until<F>(&mut self, cancel: F) -> Result<SessionStatus>
    where
        F: Future<Output = ()>,
    {
        self.ensure_ready()?;
        let started = Instant::now();

        let Some(public_key) = self.keys.public_key() else {
            let failure = Failed::new(
                FailureCause::KeyUnavailable,
                Error::KeyUnavailable("public key has not been fetched".into()),
                None,
            );
            return Ok(self.finish_failed(failure, started));
        };
        let sealer = HybridSealer::new(public_key);
        let _in_flight = InFlight {
            status: &self.status,
        };

        let outcome = tokio::select! {
            outcome = self.run(sealer, started) => Some(outcome),
            _ = cancel => None,
        };

        let status = match outcome {
            Some(Ok(metrics)) => {
                info!(
                    payload_bytes = metrics.payload_bytes,
                    overhead_bytes = metrics.overhead_bytes(),
                    encryption_ms = metrics.encryption.as_millis() as u64,
                    total_ms = metrics.total.as_millis() as u64,
                    "transmission succeeded"
                );
                SessionStatus::Success(metrics)
            }
            Some(Err(failure)) => return Ok(self.finish_failed(failure, started)),
            None => {
                info!("transmission cancelled");
                SessionStatus::Idle
            }
        };
        self.set_status(status.clone());
        Ok(status)
    }

    async fn run(
        &self,
        sealer: HybridSealer,
        started: Instant,
    ) -> std::result::Result<TransmissionMetrics, Failed> {
        self.set_status(SessionStatus::GeneratingPayload);
        let payload = self
            .acquire()
            .await
            .map_err(|e| Failed::new(FailureCause::NoPayload, e, None))?;
        debug!(bytes = payload.len(), source = ?payload.source(), "payload acquired");

        self.set_status(SessionStatus::Encrypting);
        let encryption_started = Instant::now();
        let seal = self.seal.clone();
        let sealed = sealer
            .seal_offloaded_with(payload.bytes().clone(), move |sealer, plaintext| {
                seal(sealer, plaintext)
            })
            .await;
        let encryption = encryption_started.elapsed();
        let sealed =
            sealed.map_err(|e| Failed::new(FailureCause::EncryptionFailure, e, Some(encryption)))?;
        debug!(encryption_ms = encryption.as_millis() as u64, "payload sealed");

        let envelope =
            UploadEnvelope::package(self.credential.identity(), sealed, payload.data_type());
        let envelope_bytes = envelope.wire_len();

        self.set_status(SessionStatus::Uploading);
        self.transport
            .upload(envelope, &self.credential)
            .await
            .map_err(|e| Failed::new(FailureCause::UploadFailure, e, Some(encryption)))?;

        Ok(TransmissionMetrics {
            payload_bytes: payload.len(),
            envelope_bytes,
            encryption,
            total: started.elapsed(),
        })
    }

    async fn acquire(&self) -> Result<Payload> {
        match &self.selection {
            PayloadSelection::Synthetic { size } => {
                let size = *size;
                let limits = self.limits;
                // Large synthetic buffers are built off the async runtime.
                tokio::task::spawn_blocking(move || Payload::synthetic(size, &limits))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))?
            }
            PayloadSelection::File { path: Some(path) } => {
                Payload::from_file(path, &self.limits).await
            }
            PayloadSelection::File { path: None } => Err(Error::NoPayloadSelected),
            PayloadSelection::Document { data_type, body } => {
                Payload::from_document(data_type.as_str(), body.as_str(), &self.limits)
            }
        }
    }

    fn finish_failed(&self, failure: Failed, started: Instant) -> SessionStatus {
        let detail = match &failure.error {
            Error::Transport { detail, .. } => detail.clone(),
            _ => None,
        };
        warn!(cause = ?failure.cause, error = %failure.error, "transmission failed");
        let status = SessionStatus::Error(SessionFailure {
            cause: failure.cause,
            message: failure.error.to_string(),
            detail,
            encryption: failure.encryption,
            total: started.elapsed(),
        });
        self.set_status(status.clone());
        status
    }

    fn ensure_ready(&self) -> Result<()> {
        let status = self.status.borrow();
        if status.is_busy() {
            return Err(Error::Busy(status.name()));
        }
        Ok(())
    }

    fn set_status(&self, status: SessionStatus) {
        info!(status = status.name(), "session status");
        self.status.send_replace(status);
    }
}
