//! `HybridSealer` 提供 RSA-OAEP + AES-256-GCM 信封加密。
//!
//! Every call to [`HybridSealer::seal`] draws a new 256-bit data key and a
//! 96-bit nonce from the OS CSPRNG, encrypts the whole plaintext in one pass
//! with AES-256-GCM (tag appended, no associated data), then wraps the data
//! key with the server public key using RSA-OAEP with SHA-256 as both the
//! digest and the MGF1 hash. The data key is zeroed as soon as it is wrapped.
//!
//! [`open`] is the receiving side of the same construction.

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose};
use bytes::Bytes;
use rand_core::{OsRng, TryCryptoRng};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::rand_core::{OsRng as RsaOsRng, RngCore as _};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16; // AES-GCM's tag is 16 bytes
pub const MIN_RSA_BITS: usize = 2048;
/// SHA-256 output length, the OAEP seed size.
const OAEP_SEED_SIZE: usize = 32;

/// The server's RSA public key, parsed once and kept next to its PEM text.
#[derive(Clone, PartialEq)]
pub struct ServerPublicKey {
    pem: String,
    key: RsaPublicKey,
}

impl ServerPublicKey {
    /// Parses a PEM public key. SPKI (`PUBLIC KEY`) and PKCS#1
    /// (`RSA PUBLIC KEY`) encodings are accepted; moduli below 2048 bits are
    /// rejected.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let pem = pem.trim();
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::KeyUnavailable(format!("unparseable RSA public key: {e}")))?;
        Self::checked(pem.to_string(), key)
    }

    /// Wraps an already parsed key, exporting it as SPKI PEM.
    pub fn from_public_key(key: RsaPublicKey) -> Result<Self> {
        let pem = key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::KeyUnavailable(format!("RSA public key export failed: {e}")))?;
        Self::checked(pem, key)
    }

    fn checked(pem: String, key: RsaPublicKey) -> Result<Self> {
        let bits = key.size() * 8;
        if bits < MIN_RSA_BITS {
            return Err(Error::KeyUnavailable(format!(
                "RSA modulus of {bits} bits is below the {MIN_RSA_BITS} bit minimum"
            )));
        }
        Ok(Self { pem, key })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn bits(&self) -> usize {
        self.key.size() * 8
    }

    pub fn inner(&self) -> &RsaPublicKey {
        &self.key
    }
}

impl fmt::Debug for ServerPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPublicKey")
            .field("bits", &self.bits())
            .finish()
    }
}

/// Output of one seal operation. The data key itself is never part of it.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// The data key encrypted under the server public key.
    pub wrapped_key: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    pub fn wrapped_key_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.wrapped_key)
    }

    pub fn nonce_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.nonce)
    }

    /// Length of the plaintext this payload was sealed from.
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }

    /// Total bytes carried on the wire beyond the plaintext.
    pub fn overhead(&self) -> usize {
        self.wrapped_key.len() + NONCE_SIZE + TAG_SIZE
    }
}

impl fmt::Debug for SealedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedPayload")
            .field("wrapped_key_len", &self.wrapped_key.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Seals payloads for one server public key.
///
/// Cheap to clone; the key is shared read-only between clones.
#[derive(Clone, Debug)]
pub struct HybridSealer {
    public_key: Arc<ServerPublicKey>,
}

impl HybridSealer {
    pub fn new(public_key: Arc<ServerPublicKey>) -> Self {
        Self { public_key }
    }

    /// Builds a sealer from a possibly missing key. Without a key nothing can be
    /// sealed, so this fails with [`Error::KeyUnavailable`].
    pub fn try_new(public_key: Option<Arc<ServerPublicKey>>) -> Result<Self> {
        public_key
            .map(Self::new)
            .ok_or_else(|| Error::KeyUnavailable("public key has not been fetched".into()))
    }

    pub fn public_key(&self) -> &Arc<ServerPublicKey> {
        &self.public_key
    }

    /// Seals `plaintext` on the current thread.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedPayload> {
        self.seal_with_rng(&mut OsRng, plaintext)
    }

    /// Seals `plaintext` on tokio's blocking pool so large buffers do not stall
    /// the async runtime. The buffer is shared, not copied.
    pub async fn seal_offloaded(&self, plaintext: Bytes) -> Result<SealedPayload> {
        self.seal_offloaded_with(plaintext, |sealer, data| sealer.seal(data))
            .await
    }

    /// [`HybridSealer::seal_offloaded`] with a caller-chosen seal routine.
    pub(crate) async fn seal_offloaded_with<F>(
        &self,
        plaintext: Bytes,
        seal: F,
    ) -> Result<SealedPayload>
    where
        F: FnOnce(&HybridSealer, &[u8]) -> Result<SealedPayload> + Send + 'static,
    {
        let sealer = self.clone();
        tokio::task::spawn_blocking(move || seal(&sealer, &plaintext))
            .await
            .map_err(|e| Error::Encryption(format!("sealing task failed: {e}")))?
    }

    /// Seals with the data key, nonce and OAEP padding seed all drawn from
    /// `rng`. A failing source aborts with [`Error::RandomSourceFailure`]
    /// before anything is encrypted.
    pub fn seal_with_rng<R>(&self, rng: &mut R, plaintext: &[u8]) -> Result<SealedPayload>
    where
        R: TryCryptoRng + ?Sized,
    {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut nonce = [0u8; NONCE_SIZE];
        rng.try_fill_bytes(key.as_mut_slice())
            .map_err(|e| Error::RandomSourceFailure(e.to_string()))?;
        rng.try_fill_bytes(&mut nonce)
            .map_err(|e| Error::RandomSourceFailure(e.to_string()))?;
        let mut oaep_seed = OaepSeed::default();
        rng.try_fill_bytes(oaep_seed.seed.as_mut_slice())
            .map_err(|e| Error::RandomSourceFailure(e.to_string()))?;

        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption("AES-256-GCM encryption failed".into()))?;

        let wrapped_key = self
            .public_key
            .inner()
            .encrypt(&mut oaep_seed, Oaep::new::<Sha256>(), key.as_slice())
            .map_err(|e| Error::Encryption(format!("RSA-OAEP key wrapping failed: {e}")))?;
        drop(key);

        Ok(SealedPayload {
            wrapped_key,
            nonce,
            ciphertext,
        })
    }
}

/// Hands a pre-drawn OAEP seed to the `rsa` crate, whose RNG interface is
/// infallible. OAEP with SHA-256 asks for exactly one seed; should it ever ask
/// for more, the remainder comes from the OS source.
#[derive(Default)]
struct OaepSeed {
    seed: Zeroizing<[u8; OAEP_SEED_SIZE]>,
    used: usize,
}

impl rsa::rand_core::RngCore for OaepSeed {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let n = dest.len().min(OAEP_SEED_SIZE - self.used);
        dest[..n].copy_from_slice(&self.seed[self.used..self.used + n]);
        self.used += n;
        if n < dest.len() {
            RsaOsRng.fill_bytes(&mut dest[n..]);
        }
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> std::result::Result<(), rsa::rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl rsa::rand_core::CryptoRng for OaepSeed {}

/// Unwraps the data key with `private_key` and decrypts `ciphertext`.
///
/// The GCM tag is checked before any plaintext is returned; a mismatch yields
/// [`Error::Decryption`].
pub fn open(
    private_key: &RsaPrivateKey,
    wrapped_key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::Decryption(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            nonce.len()
        )));
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Decryption("ciphertext is shorter than the tag".into()));
    }

    let key = Zeroizing::new(
        private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped_key)
            .map_err(|e| Error::Decryption(format!("RSA-OAEP unwrap failed: {e}")))?,
    );
    if key.len() != KEY_SIZE {
        return Err(Error::Decryption(format!(
            "unwrapped key must be {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }

    let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decryption("authentication tag mismatch".into()))
}

/// [`open`] for the text form used on the wire: base64 wrapped key and nonce.
pub fn open_encoded(
    private_key: &RsaPrivateKey,
    wrapped_key_b64: &str,
    nonce_b64: &str,
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let wrapped_key = general_purpose::STANDARD.decode(wrapped_key_b64.trim())?;
    let nonce = general_purpose::STANDARD.decode(nonce_b64.trim())?;
    open(private_key, &wrapped_key, &nonce, ciphertext)
}
