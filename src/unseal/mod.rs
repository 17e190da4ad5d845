//! Unseal services
//!
//! The unseal boundary provides the outermost wrapping keys, which are never
//! persisted by the barrier. Two variants exist: [`SimpleUnsealService`]
//! holds caller-provided wrapping keys, and [`SharedSecretUnsealService`]
//! derives wrapping keys from M-of-N shared secret combinations.
//!
//! Because JWE compact serialization carries a single recipient, an unseal
//! envelope is one compact JWE per wrapping key, newline-joined. Decryption
//! scans for a `kid` the service holds; "no candidate key matched" is
//! reported distinctly from an integrity failure.

pub mod shared;
pub mod simple;

use crate::error::{Error, Result};
use crate::id::KeyId;
use crate::jose::{self, KeyAlg};
use crate::key::KeyMaterial;
use crate::AES256_KEY_SIZE;

use async_trait::async_trait;
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use std::sync::RwLock;

pub use shared::SharedSecretUnsealService;
pub use simple::SimpleUnsealService;

// Domain-separated HKDF constants. The kid and key-material derivations use
// different salt and info values so the two outputs can never be conflated.
const UNSEAL_KID_SALT: &[u8] = b"keybarrier/unseal/kid/salt/v1";
const UNSEAL_KID_INFO: &[u8] = b"keybarrier/unseal/kid/info/v1";
const UNSEAL_KEY_SALT: &[u8] = b"keybarrier/unseal/key/salt/v1";
const UNSEAL_KEY_INFO: &[u8] = b"keybarrier/unseal/key/info/v1";

/// Authenticated encryption of key material and opaque payloads under
/// wrapping keys held outside the barrier
#[async_trait]
pub trait UnsealService: Send + Sync + fmt::Debug {
    /// Wraps plaintext key material under every held wrapping key
    async fn encrypt_key(&self, key: &KeyMaterial) -> Result<String>;

    /// Recovers plaintext key material from an unseal envelope
    async fn decrypt_key(&self, sealed: &str) -> Result<KeyMaterial>;

    /// Wraps an opaque payload under every held wrapping key
    async fn encrypt_data(&self, data: &[u8]) -> Result<String>;

    /// Recovers an opaque payload from an unseal envelope
    async fn decrypt_data(&self, sealed: &str) -> Result<Vec<u8>>;

    /// Releases all cached wrapping keys; subsequent operations fail
    async fn shutdown(&self) -> Result<()>;
}

/// A wrapping key with its deterministic id
pub(crate) struct UnsealKey {
    pub(crate) kid: KeyId,
    pub(crate) key: KeyMaterial,
}

/// Derives the deterministic kid for the given input keying material
pub(crate) fn derive_kid(ikm: &[u8]) -> Result<KeyId> {
    let hkdf = Hkdf::<Sha256>::new(Some(UNSEAL_KID_SALT), ikm);
    let mut out = [0_u8; 16];
    hkdf.expand(UNSEAL_KID_INFO, &mut out)
        .map_err(|e| Error::Unseal(format!("kid derivation failed: {e}")))?;
    Ok(KeyId::from_bytes(out))
}

/// Derives wrapping key bytes for the given input keying material
pub(crate) fn derive_key(ikm: &[u8]) -> Result<KeyMaterial> {
    let hkdf = Hkdf::<Sha256>::new(Some(UNSEAL_KEY_SALT), ikm);
    let mut out = [0_u8; AES256_KEY_SIZE];
    hkdf.expand(UNSEAL_KEY_INFO, &mut out)
        .map_err(|e| Error::Unseal(format!("key derivation failed: {e}")))?;
    Ok(KeyMaterial::new(out))
}

/// The immutable set of wrapping keys behind an unseal service
///
/// Keys are computed once at construction; `shutdown` drops them (zeroizing
/// the material) and every later operation fails.
pub(crate) struct Keyring {
    keys: RwLock<Option<Vec<UnsealKey>>>,
}

impl Keyring {
    pub(crate) fn new(keys: Vec<UnsealKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(Error::InvalidArgument(
                "unseal service requires at least one wrapping key".into(),
            ));
        }
        Ok(Self {
            keys: RwLock::new(Some(keys)),
        })
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<String> {
        if plaintext.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot seal an empty payload".into(),
            ));
        }

        let guard = self.keys.read().unwrap();
        let keys = guard
            .as_ref()
            .ok_or_else(|| Error::Unseal("unseal service is shut down".into()))?;

        let mut envelopes = Vec::with_capacity(keys.len());
        for unseal_key in keys {
            envelopes.push(jose::seal(
                KeyAlg::A256Kw,
                &unseal_key.kid,
                unseal_key.key.bytes(),
                plaintext,
            )?);
        }
        Ok(envelopes.join("\n"))
    }

    pub(crate) fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        if sealed.is_empty() {
            return Err(Error::InvalidArgument(
                "cannot open an empty envelope".into(),
            ));
        }

        let guard = self.keys.read().unwrap();
        let keys = guard
            .as_ref()
            .ok_or_else(|| Error::Unseal("unseal service is shut down".into()))?;

        for line in sealed.lines() {
            let envelope = jose::parse(line)?;
            let kid = envelope.kid()?;
            if let Some(unseal_key) = keys.iter().find(|k| k.kid == kid) {
                return envelope.open(unseal_key.key.bytes());
            }
        }

        Err(Error::Unseal(
            "no candidate unseal key matched any envelope kid".into(),
        ))
    }

    pub(crate) fn shutdown(&self) {
        // Dropping the keys zeroizes their material
        let mut guard = self.keys.write().unwrap();
        *guard = None;
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .keys
            .read()
            .unwrap()
            .as_ref()
            .map_or(0, |keys| keys.len());
        f.debug_struct("Keyring").field("keys", &count).finish()
    }
}

/// Opens a sealed key envelope and checks the recovered length
pub(crate) fn open_key(keyring: &Keyring, sealed: &str) -> Result<KeyMaterial> {
    let mut bytes = keyring.open(sealed)?;
    let material = KeyMaterial::from_slice(&bytes)
        .map_err(|_| Error::KeyWrap("unsealed key has unexpected length".into()));
    crate::util::mem_clear(&mut bytes);
    material
}
