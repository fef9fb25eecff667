//! Transport packaging: bearer credential handling and the upload envelope.
//!
//! The identity placed in an envelope is read from the bearer token's `sub`
//! claim without verifying the token signature. It is a display value only;
//! the ingestion service re-derives and verifies the identity itself and
//! nothing in this crate uses it to make an authorization decision.

use crate::contract::{
    CIPHERTEXT_CONTENT_TYPE, CIPHERTEXT_FILE_NAME, FIELD_DATA_TYPE, FIELD_ENCRYPTED_KEY,
    FIELD_FILE, FIELD_IV, FIELD_PLANT_EMAIL,
};
use crate::error::{Error, Result};
use crate::sealer::SealedPayload;
use base64::{Engine, engine::general_purpose};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::fmt;

/// A subject claim decoded from a bearer token whose signature was NOT checked.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnverifiedIdentity(String);

impl UnverifiedIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for UnverifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Reads the `sub` claim from a JWT-shaped token. Pure; no signature check.
pub fn decode_subject(token: &str) -> Result<UnverifiedIdentity> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token);

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::InvalidCredential(
            "expected three dot-separated segments".into(),
        ));
    };

    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::InvalidCredential(format!("claims segment is not base64url: {e}")))?;
    let claims: Claims = serde_json::from_slice(&raw)
        .map_err(|e| Error::InvalidCredential(format!("claims segment is not JSON: {e}")))?;

    match claims.sub {
        Some(sub) if !sub.trim().is_empty() => Ok(UnverifiedIdentity(sub)),
        _ => Err(Error::InvalidCredential("token has no subject claim".into())),
    }
}

/// The caller's bearer token together with its decoded display identity.
#[derive(Clone)]
pub struct BearerCredential {
    token: String,
    identity: UnverifiedIdentity,
}

impl BearerCredential {
    pub fn parse(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token).to_string();
        let identity = decode_subject(&token)?;
        Ok(Self { token, identity })
    }

    /// The raw token, sent as-is in the `Authorization` header.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn identity(&self) -> &UnverifiedIdentity {
        &self.identity
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Everything one upload carries. Built once per transmission and consumed by
/// the transport.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadEnvelope {
    identity: UnverifiedIdentity,
    encrypted_key: String,
    iv: String,
    ciphertext: Vec<u8>,
    data_type: Option<String>,
}

impl UploadEnvelope {
    /// Packages a sealed payload. Only callable with a completed seal, so a
    /// partially encrypted payload can never be packaged.
    pub fn package(
        identity: &UnverifiedIdentity,
        sealed: SealedPayload,
        data_type: Option<&str>,
    ) -> Self {
        Self {
            identity: identity.clone(),
            encrypted_key: sealed.wrapped_key_base64(),
            iv: sealed.nonce_base64(),
            ciphertext: sealed.ciphertext,
            data_type: data_type.map(str::to_string),
        }
    }

    pub fn identity(&self) -> &UnverifiedIdentity {
        &self.identity
    }

    /// Base64 RSA-OAEP wrapped data key.
    pub fn encrypted_key(&self) -> &str {
        &self.encrypted_key
    }

    /// Base64 GCM nonce.
    pub fn iv(&self) -> &str {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    /// Bytes of key, nonce and ciphertext content, excluding multipart framing.
    pub fn wire_len(&self) -> usize {
        self.encrypted_key.len() + self.iv.len() + self.ciphertext.len()
    }

    /// Converts into the multipart body expected by the ingestion endpoint.
    pub fn into_form(self) -> Result<Form> {
        let file = Part::bytes(self.ciphertext)
            .file_name(CIPHERTEXT_FILE_NAME)
            .mime_str(CIPHERTEXT_CONTENT_TYPE)?;

        let mut form = Form::new()
            .text(FIELD_PLANT_EMAIL, self.identity.into_string())
            .text(FIELD_ENCRYPTED_KEY, self.encrypted_key)
            .text(FIELD_IV, self.iv);
        if let Some(data_type) = self.data_type {
            form = form.text(FIELD_DATA_TYPE, data_type);
        }
        Ok(form.part(FIELD_FILE, file))
    }
}

impl fmt::Debug for UploadEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadEnvelope")
            .field("identity", &self.identity)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("data_type", &self.data_type)
            .finish()
    }
}
