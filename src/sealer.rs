//! Envelope encryption: a fresh AES-256-GCM key per payload, wrapped with the
//! server's RSA-OAEP public key.

pub mod hybrid;

pub use self::hybrid::{HybridSealer, SealedPayload, ServerPublicKey, open, open_encoded};
