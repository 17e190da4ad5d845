//! Simple unseal service over caller-provided wrapping keys

use crate::error::Result;
use crate::key::KeyMaterial;
use crate::unseal::{derive_kid, open_key, Keyring, UnsealKey, UnsealService};

use async_trait::async_trait;
use std::fmt;

/// Unseal service holding N caller-provided 256-bit wrapping keys
///
/// Encryption wraps under every key; decryption succeeds if any one of them
/// matches the envelope's `kid`. Kids are derived deterministically from the
/// key bytes, so independently constructed services holding the same key
/// interoperate.
pub struct SimpleUnsealService {
    keyring: Keyring,
}

impl SimpleUnsealService {
    /// Creates a service from the given wrapping keys
    pub fn new(keys: Vec<KeyMaterial>) -> Result<Self> {
        let mut unseal_keys = Vec::with_capacity(keys.len());
        for key in keys {
            let kid = derive_kid(key.bytes())?;
            unseal_keys.push(UnsealKey { kid, key });
        }
        Ok(Self {
            keyring: Keyring::new(unseal_keys)?,
        })
    }
}

impl fmt::Debug for SimpleUnsealService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleUnsealService")
            .field("keyring", &self.keyring)
            .finish()
    }
}

#[async_trait]
impl UnsealService for SimpleUnsealService {
    async fn encrypt_key(&self, key: &KeyMaterial) -> Result<String> {
        self.keyring.seal(key.bytes())
    }

    async fn decrypt_key(&self, sealed: &str) -> Result<KeyMaterial> {
        open_key(&self.keyring, sealed)
    }

    async fn encrypt_data(&self, data: &[u8]) -> Result<String> {
        self.keyring.seal(data)
    }

    async fn decrypt_data(&self, sealed: &str) -> Result<Vec<u8>> {
        self.keyring.open(sealed)
    }

    async fn shutdown(&self) -> Result<()> {
        self.keyring.shutdown();
        Ok(())
    }
}
