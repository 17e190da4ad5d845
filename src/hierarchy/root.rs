//! Root key service
//!
//! The top of the hierarchy. Root keys are wrapped by the unseal service and
//! used directly (alg `dir`) as the content encryption key for intermediate
//! key envelopes.

use crate::debugf;
use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};
use crate::jose::{self, KeyAlg};
use crate::key::{KeyGenerator, KeyMaterial};
use crate::repository::{KeyRecord, KeyTransaction};
use crate::unseal::UnsealService;
use crate::util;

use std::fmt;
use std::sync::Arc;

/// Initializes the root tier and wraps/unwraps intermediate keys
pub struct RootKeyService {
    unseal: Arc<dyn UnsealService>,
    generator: Arc<dyn KeyGenerator>,
}

impl fmt::Debug for RootKeyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKeyService")
            .field("unseal", &self.unseal)
            .field("generator", &self.generator)
            .finish()
    }
}

impl RootKeyService {
    /// Creates the service over its collaborators
    pub fn new(unseal: Arc<dyn UnsealService>, generator: Arc<dyn KeyGenerator>) -> Self {
        Self { unseal, generator }
    }

    /// Creates the first root key if the tier is empty; otherwise a no-op
    pub async fn init(&self, tx: &mut dyn KeyTransaction) -> Result<()> {
        match tx.latest(Tier::Root).await {
            Ok(_) => Ok(()),
            Err(Error::EmptyTier(_)) => {
                let id = self.generator.generate_id();
                let key = self.generator.generate_key()?;
                let sealed = self.unseal.encrypt_key(&key).await?;
                tx.add(Tier::Root, KeyRecord::new(id, sealed, None)).await?;
                debugf!("root key tier initialized, key {id}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Wraps a plaintext intermediate key under the latest root
    ///
    /// Returns the envelope and the id of the root key that was used.
    pub async fn encrypt_key(
        &self,
        tx: &mut dyn KeyTransaction,
        plain: &KeyMaterial,
    ) -> Result<(String, KeyId)> {
        let _timer = crate::timer!("barrier.root.encrypt_key");

        let record = tx.latest(Tier::Root).await?;
        let root = self.unseal.decrypt_key(&record.encrypted).await?;
        let sealed = jose::seal(KeyAlg::Dir, &record.id, root.bytes(), plain.bytes())?;
        Ok((sealed, record.id))
    }

    /// Recovers a plaintext intermediate key from its envelope
    pub async fn decrypt_key(
        &self,
        tx: &mut dyn KeyTransaction,
        sealed: &str,
    ) -> Result<KeyMaterial> {
        if sealed.is_empty() {
            return Err(Error::InvalidArgument(
                "wrapped intermediate key is empty".into(),
            ));
        }

        let _timer = crate::timer!("barrier.root.decrypt_key");

        let envelope = jose::parse(sealed)?;
        let kid = envelope.kid()?;
        let record = tx.get(Tier::Root, kid).await?;
        let root = self.unseal.decrypt_key(&record.encrypted).await?;

        let mut bytes = envelope.open(root.bytes())?;
        let material = KeyMaterial::from_slice(&bytes)
            .map_err(|_| Error::KeyWrap("unwrapped key has unexpected length".into()));
        util::mem_clear(&mut bytes);
        material
    }
}
