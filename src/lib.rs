//! # Plant-Seal: Hybrid Envelope Encryption for Plant Uploads
//!
//! `plant-seal` lets an edge device ("plant") send arbitrary data to a central
//! ingestion service over an untrusted network. Each transmission gets a fresh
//! AES-256-GCM data key; the key is wrapped with the server's RSA-OAEP
//! (SHA-256) public key, fetched once per session, and the result is uploaded
//! as a multipart envelope authorized by the plant's bearer token.
//!
//! ## Core Concepts
//!
//! - **`RemoteKeyProvider`**: fetches and caches the server public key.
//! - **`Payload`**: synthetic filler, a file, or a JSON document, held in memory.
//! - **`HybridSealer`**: the envelope encryption engine.
//! - **`UploadEnvelope`**: wrapped key, nonce and ciphertext ready for transport.
//! - **`TransmitSession`**: the state machine sequencing a transmission.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plant_seal::ClientConfig;
//! use plant_seal::client::{SessionStatus, TransmitSession};
//!
//! # async fn run(token: &str) -> plant_seal::Result<()> {
//! let config = ClientConfig::default().from_env()?;
//! let mut session = TransmitSession::connect(&config, token).await?;
//!
//! session.select_size(100 * 1024)?;
//! match session.transmit().await? {
//!     SessionStatus::Success(metrics) => println!("sent in {:?}", metrics.total),
//!     SessionStatus::Error(failure) => eprintln!("{}", failure.message),
//!     _ => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{Error, Result};

/// The version of the `plant-seal` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod client;
pub mod common;
pub mod contract;
pub mod payload;
pub mod sealer;

pub use common::ClientConfig;
pub use payload::{Payload, PayloadLimits, PayloadSource};
pub use sealer::{HybridSealer, SealedPayload, ServerPublicKey};
