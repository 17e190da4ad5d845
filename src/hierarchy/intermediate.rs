//! Intermediate key service
//!
//! The middle tier. Intermediate keys are wrapped under the latest root key
//! (alg `dir`) and wrap content keys with AES key wrap (alg `A256KW`).

use crate::debugf;
use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};
use crate::jose::{self, KeyAlg};
use crate::key::{KeyGenerator, KeyMaterial};
use crate::repository::{KeyRecord, KeyTransaction};
use crate::util;

use super::RootKeyService;

use std::fmt;
use std::sync::Arc;

/// Initializes the intermediate tier and wraps/unwraps content keys
pub struct IntermediateKeyService {
    root: Arc<RootKeyService>,
    generator: Arc<dyn KeyGenerator>,
}

impl fmt::Debug for IntermediateKeyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediateKeyService")
            .field("root", &self.root)
            .field("generator", &self.generator)
            .finish()
    }
}

impl IntermediateKeyService {
    /// Creates the service over its collaborators
    pub fn new(root: Arc<RootKeyService>, generator: Arc<dyn KeyGenerator>) -> Self {
        Self { root, generator }
    }

    /// Creates the first intermediate key if the tier is empty; otherwise a
    /// no-op
    pub async fn init(&self, tx: &mut dyn KeyTransaction) -> Result<()> {
        match tx.latest(Tier::Intermediate).await {
            Ok(_) => Ok(()),
            Err(Error::EmptyTier(_)) => {
                let id = self.generator.generate_id();
                let key = self.generator.generate_key()?;
                let (sealed, root_id) = self.root.encrypt_key(&mut *tx, &key).await?;
                tx.add(
                    Tier::Intermediate,
                    KeyRecord::new(id, sealed, Some(root_id)),
                )
                .await?;
                debugf!("intermediate key tier initialized, key {id}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Wraps a plaintext content key under the latest intermediate
    ///
    /// Returns the envelope and the id of the intermediate key that was
    /// used.
    pub async fn encrypt_key(
        &self,
        tx: &mut dyn KeyTransaction,
        plain: &KeyMaterial,
    ) -> Result<(String, KeyId)> {
        let _timer = crate::timer!("barrier.intermediate.encrypt_key");

        let record = tx.latest(Tier::Intermediate).await?;
        let intermediate = self.root.decrypt_key(&mut *tx, &record.encrypted).await?;
        let sealed = jose::seal(
            KeyAlg::A256Kw,
            &record.id,
            intermediate.bytes(),
            plain.bytes(),
        )?;
        Ok((sealed, record.id))
    }

    /// Recovers a plaintext content key from its envelope
    pub async fn decrypt_key(
        &self,
        tx: &mut dyn KeyTransaction,
        sealed: &str,
    ) -> Result<KeyMaterial> {
        if sealed.is_empty() {
            return Err(Error::InvalidArgument(
                "wrapped content key is empty".into(),
            ));
        }

        let _timer = crate::timer!("barrier.intermediate.decrypt_key");

        let envelope = jose::parse(sealed)?;
        let kid = envelope.kid()?;
        let record = tx.get(Tier::Intermediate, kid).await?;
        let intermediate = self.root.decrypt_key(&mut *tx, &record.encrypted).await?;

        let mut bytes = envelope.open(intermediate.bytes())?;
        let material = KeyMaterial::from_slice(&bytes)
            .map_err(|_| Error::KeyWrap("unwrapped key has unexpected length".into()));
        util::mem_clear(&mut bytes);
        material
    }
}
