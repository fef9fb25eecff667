//! Provides a key provider that fetches the server public key from a remote endpoint.

use crate::client::transport::Transport;
use crate::error::{Error, Result};
use crate::sealer::{HybridSealer, ServerPublicKey};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// A key provider that retrieves the server public key once per session.
///
/// The first successful fetch is cached for the lifetime of the provider and
/// later calls are served from the cache without touching the network. A failed
/// fetch leaves the cache empty, so the caller may retry explicitly. While the
/// cache is empty every attempt to build a [`HybridSealer`] is refused.
pub struct RemoteKeyProvider {
    transport: Arc<dyn Transport>,
    cache: OnceCell<Arc<ServerPublicKey>>,
}

impl RemoteKeyProvider {
    /// Creates a new `RemoteKeyProvider`.
    ///
    /// # Arguments
    ///
    /// * `transport`: The transport used to reach the public key endpoint.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: OnceCell::new(),
        }
    }

    /// Creates a provider whose key is already known, e.g. pinned in configuration.
    pub fn with_key(transport: Arc<dyn Transport>, key: Arc<ServerPublicKey>) -> Self {
        Self {
            transport,
            cache: OnceCell::new_with(Some(key)),
        }
    }

    /// Returns the cached key, fetching it first if needed.
    ///
    /// Concurrent callers share one in-flight fetch. Every failure, including
    /// an unparseable or too weak key, is reported as [`Error::KeyUnavailable`].
    pub async fn fetch_public_key(&self) -> Result<Arc<ServerPublicKey>> {
        self.cache
            .get_or_try_init(|| async {
                let pem = self.transport.fetch_public_key().await.map_err(|e| match e {
                    Error::KeyUnavailable(msg) => Error::KeyUnavailable(msg),
                    other => Error::KeyUnavailable(other.to_string()),
                })?;
                let key = ServerPublicKey::from_pem(&pem)?;
                info!(bits = key.bits(), "server public key cached");
                Ok::<_, Error>(Arc::new(key))
            })
            .await
            .cloned()
            .inspect_err(|e| warn!(error = %e, "server public key unavailable"))
    }

    /// The cached key, if a fetch has succeeded. Never performs I/O.
    pub fn public_key(&self) -> Option<Arc<ServerPublicKey>> {
        self.cache.get().cloned()
    }

    pub fn is_available(&self) -> bool {
        self.cache.initialized()
    }

    /// A sealer bound to the cached key, or [`Error::KeyUnavailable`].
    pub fn sealer(&self) -> Result<HybridSealer> {
        HybridSealer::try_new(self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::envelope::{BearerCredential, UploadEnvelope};
    use async_trait::async_trait;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves queued responses to key fetches, counting calls.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<String>>>,
        fetches: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<Result<String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch_public_key(&self) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::KeyUnavailable("no scripted response".into())))
        }

        async fn upload(&self, _: UploadEnvelope, _: &BearerCredential) -> Result<()> {
            unreachable!("key provider never uploads")
        }
    }

    fn pem() -> String {
        let private_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_is_cached() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(pem())]));
        let provider = RemoteKeyProvider::new(transport.clone());
        assert!(provider.public_key().is_none());
        assert!(matches!(provider.sealer(), Err(Error::KeyUnavailable(_))));

        let first = provider.fetch_public_key().await.unwrap();
        let second = provider.fetch_public_key().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
        assert!(provider.is_available());
        assert!(provider.sealer().is_ok());
    }

    #[tokio::test]
    async fn test_failed_fetch_can_be_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(Error::Transport {
                status: None,
                detail: None,
                message: "connection refused".into(),
            }),
            Ok(pem()),
        ]));
        let provider = RemoteKeyProvider::new(transport.clone());

        let err = provider.fetch_public_key().await.unwrap_err();
        assert!(matches!(err, Error::KeyUnavailable(ref msg) if msg.contains("connection refused")));
        assert!(provider.public_key().is_none());

        assert!(provider.fetch_public_key().await.is_ok());
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_garbage_key_is_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok("-----BEGIN NONSENSE-----".into())]));
        let provider = RemoteKeyProvider::new(transport);
        assert!(matches!(
            provider.fetch_public_key().await,
            Err(Error::KeyUnavailable(_))
        ));
        assert!(!provider.is_available());
    }
}
