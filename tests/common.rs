//!
//! 集成测试的通用辅助函数
//!
//! A reference ingestion server built on axum, shared RSA keys, unsigned test
//! tokens, and an in-memory transport for session tests.
//!
#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{Engine, engine::general_purpose};
use plant_seal::client::{BearerCredential, Transport, UploadEnvelope};
use plant_seal::contract::{
    FIELD_DATA_TYPE, FIELD_ENCRYPTED_KEY, FIELD_FILE, FIELD_IV, FIELD_PLANT_EMAIL,
    PublicKeyResponse,
};
use plant_seal::sealer::open_encoded;
use plant_seal::{ClientConfig, Error, Result};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

pub const PLANT_EMAIL: &str = "plant-12@factory.example";

/// One RSA-2048 key pair per test binary; generation is slow.
pub fn server_keys() -> &'static (RsaPrivateKey, String) {
    static KEYS: OnceLock<(RsaPrivateKey, String)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let private_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        (private_key, pem)
    })
}

/// An unsigned JWT-shaped token for `sub`.
pub fn token_for(sub: &str) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = general_purpose::URL_SAFE_NO_PAD
        .encode(json!({ "sub": sub, "role": "plant", "exp": 4102444800u64 }).to_string());
    format!("{header}.{claims}.dGVzdC1zaWduYXR1cmU")
}

pub fn plant_token() -> String {
    token_for(PLANT_EMAIL)
}

/// What the reference server saw in one accepted upload.
#[derive(Clone, Debug)]
pub struct Received {
    pub bearer: String,
    pub plant_email: String,
    pub encrypted_key: String,
    pub iv: String,
    pub data_type: Option<String>,
    pub content_type: Option<String>,
    pub plaintext: Vec<u8>,
}

struct ServerState {
    private_key: RsaPrivateKey,
    public_pem: String,
    deny_detail: Option<String>,
    key_fetches: AtomicUsize,
    received: Mutex<Vec<Received>>,
}

/// A running reference ingestion server.
pub struct ReferenceServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl ReferenceServer {
    /// Accepts and decrypts every well-formed upload.
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Rejects every upload with `403 {"detail": detail}`.
    pub async fn denying(detail: &str) -> Self {
        Self::spawn(Some(detail.to_string())).await
    }

    async fn spawn(deny_detail: Option<String>) -> Self {
        let (private_key, public_pem) = server_keys().clone();
        let state = Arc::new(ServerState {
            private_key,
            public_pem,
            deny_detail,
            key_fetches: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/auth/public-key", get(public_key))
            .route("/api/ingest/secure", post(ingest))
            .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            api_url: format!("http://{}", self.addr),
            request_timeout_secs: 10,
            ..ClientConfig::default()
        }
    }

    pub fn public_pem(&self) -> &str {
        &self.state.public_pem
    }

    pub fn key_fetches(&self) -> usize {
        self.state.key_fetches.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }
}

/// Config pointing at a port nobody listens on.
pub async fn unreachable_config() -> ClientConfig {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ClientConfig {
        api_url: format!("http://{addr}"),
        request_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

async fn public_key(State(state): State<Arc<ServerState>>) -> Json<PublicKeyResponse> {
    state.key_fetches.fetch_add(1, Ordering::SeqCst);
    Json(PublicKeyResponse {
        public_key: state.public_pem.clone(),
    })
}

fn reject(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

async fn ingest(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
    else {
        return reject(StatusCode::UNAUTHORIZED, "Not authenticated");
    };
    let mut plant_email = None;
    let mut encrypted_key = None;
    let mut iv = None;
    let mut data_type = None;
    let mut file = None;
    let mut content_type = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == FIELD_FILE {
            content_type = field.content_type().map(str::to_string);
            match field.bytes().await {
                Ok(bytes) => file = Some(bytes.to_vec()),
                Err(e) => return reject(StatusCode::BAD_REQUEST, e.body_text()),
            }
            continue;
        }
        let Ok(text) = field.text().await else {
            return reject(StatusCode::BAD_REQUEST, format!("unreadable field {name}"));
        };
        match name.as_str() {
            FIELD_PLANT_EMAIL => plant_email = Some(text),
            FIELD_ENCRYPTED_KEY => encrypted_key = Some(text),
            FIELD_IV => iv = Some(text),
            FIELD_DATA_TYPE => data_type = Some(text),
            _ => {}
        }
    }

    // The body is drained first so the client always reads a clean response.
    if let Some(detail) = &state.deny_detail {
        return reject(StatusCode::FORBIDDEN, detail.clone());
    }

    let (Some(plant_email), Some(encrypted_key), Some(iv), Some(file)) =
        (plant_email, encrypted_key, iv, file)
    else {
        return reject(StatusCode::UNPROCESSABLE_ENTITY, "missing multipart field");
    };

    let plaintext = match open_encoded(&state.private_key, &encrypted_key, &iv, &file) {
        Ok(plaintext) => plaintext,
        Err(e) => return reject(StatusCode::BAD_REQUEST, format!("Decryption failed: {e}")),
    };

    state.received.lock().unwrap().push(Received {
        bearer,
        plant_email,
        encrypted_key,
        iv,
        data_type,
        content_type,
        plaintext,
    });
    Json(json!({ "status": "success" })).into_response()
}

/// In-memory transport: serves the shared public key, decrypts uploads, and
/// optionally stalls or rejects them.
pub struct MemoryTransport {
    key_available: bool,
    reject_detail: Option<String>,
    upload_delay: Option<Duration>,
    key_fetches: AtomicUsize,
    uploads: Mutex<Vec<UploadEnvelope>>,
    on_upload: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            key_available: true,
            reject_detail: None,
            upload_delay: None,
            key_fetches: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
            on_upload: Mutex::new(None),
        }
    }

    pub fn without_key(mut self) -> Self {
        self.key_available = false;
        self
    }

    pub fn rejecting(mut self, detail: &str) -> Self {
        self.reject_detail = Some(detail.to_string());
        self
    }

    pub fn stalling(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    /// Runs `hook` at the start of every upload call.
    pub fn on_upload(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_upload.lock().unwrap() = Some(Arc::new(hook));
    }

    pub fn key_fetches(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<UploadEnvelope> {
        self.uploads.lock().unwrap().clone()
    }

    /// Decrypts the `index`th upload with the shared private key.
    pub fn decrypt_upload(&self, index: usize) -> Vec<u8> {
        let envelope = self.uploads()[index].clone();
        open_encoded(
            &server_keys().0,
            envelope.encrypted_key(),
            envelope.iv(),
            envelope.ciphertext(),
        )
        .unwrap()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch_public_key(&self) -> Result<String> {
        self.key_fetches.fetch_add(1, Ordering::SeqCst);
        if self.key_available {
            Ok(server_keys().1.clone())
        } else {
            Err(Error::KeyUnavailable("public key endpoint returned 503".into()))
        }
    }

    async fn upload(&self, envelope: UploadEnvelope, _: &BearerCredential) -> Result<()> {
        let hook = self.on_upload.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(detail) = &self.reject_detail {
            self.uploads.lock().unwrap().push(envelope);
            return Err(Error::Transport {
                status: Some(403),
                detail: Some(detail.clone()),
                message: "server responded with 403 Forbidden".into(),
            });
        }
        self.uploads.lock().unwrap().push(envelope);
        Ok(())
    }
}
