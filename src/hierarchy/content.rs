//! Content key service
//!
//! The bottom tier. A fresh content key is generated for every encryption,
//! wrapped under the latest intermediate, and stored; the caller's plaintext
//! is sealed under the content key with the content key's id as `kid`.
//! Content keys are never reused across encryptions.

use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};
use crate::jose::{self, KeyAlg};
use crate::key::KeyGenerator;
use crate::repository::{KeyRecord, KeyTransaction};

use super::IntermediateKeyService;

use std::fmt;
use std::sync::Arc;

/// Encrypts and decrypts caller payloads under single-use content keys
pub struct ContentKeyService {
    intermediate: Arc<IntermediateKeyService>,
    generator: Arc<dyn KeyGenerator>,
}

impl fmt::Debug for ContentKeyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKeyService")
            .field("intermediate", &self.intermediate)
            .field("generator", &self.generator)
            .finish()
    }
}

impl ContentKeyService {
    /// Creates the service over its collaborators
    pub fn new(
        intermediate: Arc<IntermediateKeyService>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            intermediate,
            generator,
        }
    }

    /// Encrypts a payload under a fresh content key
    ///
    /// The content key is wrapped under the latest intermediate and stored
    /// before the payload envelope is produced. Returns the payload envelope
    /// and the new content key's id.
    pub async fn encrypt_content(
        &self,
        tx: &mut dyn KeyTransaction,
        plaintext: &[u8],
    ) -> Result<(String, KeyId)> {
        if plaintext.is_empty() {
            return Err(Error::InvalidArgument("plaintext is empty".into()));
        }

        let _timer = crate::timer!("barrier.content.encrypt");

        let id = self.generator.generate_id();
        let key = self.generator.generate_key()?;

        let (wrapped, intermediate_id) =
            self.intermediate.encrypt_key(&mut *tx, &key).await?;
        tx.add(
            Tier::Content,
            KeyRecord::new(id, wrapped, Some(intermediate_id)),
        )
        .await?;

        let envelope = jose::seal(KeyAlg::A256Kw, &id, key.bytes(), plaintext)?;
        Ok((envelope, id))
    }

    /// Decrypts a payload envelope produced by [`Self::encrypt_content`]
    pub async fn decrypt_content(
        &self,
        tx: &mut dyn KeyTransaction,
        sealed: &str,
    ) -> Result<Vec<u8>> {
        if sealed.is_empty() {
            return Err(Error::InvalidArgument("ciphertext is empty".into()));
        }

        let _timer = crate::timer!("barrier.content.decrypt");

        let envelope = jose::parse(sealed)?;
        let kid = envelope.kid()?;
        let record = tx.get(Tier::Content, kid).await?;
        let key = self
            .intermediate
            .decrypt_key(&mut *tx, &record.encrypted)
            .await?;

        envelope.open(key.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::RootKeyService;
    use crate::key::{KeyMaterial, RandomKeyGenerator};
    use crate::repository::{InMemoryRepository, KeyRepository};
    use crate::unseal::SimpleUnsealService;
    use std::collections::HashSet;

    struct Fixture {
        root: Arc<RootKeyService>,
        intermediate: Arc<IntermediateKeyService>,
        content: ContentKeyService,
    }

    fn fixture() -> Fixture {
        let generator = Arc::new(RandomKeyGenerator::new());
        let unseal_key = generator.generate_key().unwrap();
        let unseal = Arc::new(SimpleUnsealService::new(vec![unseal_key]).unwrap());
        let root = Arc::new(RootKeyService::new(unseal, generator.clone()));
        let intermediate = Arc::new(IntermediateKeyService::new(root.clone(), generator.clone()));
        let content = ContentKeyService::new(intermediate.clone(), generator);
        Fixture {
            root,
            intermediate,
            content,
        }
    }

    async fn init_tiers(fixture: &Fixture, repository: &InMemoryRepository) {
        let mut tx = repository.begin().await.unwrap();
        fixture.root.init(&mut *tx).await.unwrap();
        fixture.intermediate.init(&mut *tx).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn encrypt_decrypt_roundtrip() {
        let repository = InMemoryRepository::new();
        let fx = fixture();
        init_tiers(&fx, &repository).await;
        let content = &fx.content;

        let mut tx = repository.begin().await.unwrap();
        let (envelope, id) = content
            .encrypt_content(&mut *tx, b"hello barrier")
            .await
            .unwrap();

        // The stored content record links to the wrapping intermediate
        let record = tx.get(Tier::Content, id).await.unwrap();
        let intermediate_id = tx.latest(Tier::Intermediate).await.unwrap().id;
        assert_eq!(record.kek_id, Some(intermediate_id));

        let opened = content.decrypt_content(&mut *tx, &envelope).await.unwrap();
        assert_eq!(opened, b"hello barrier");
    }

    #[tokio::test]
    async fn every_encryption_uses_a_fresh_content_key() {
        let repository = InMemoryRepository::new();
        let fx = fixture();
        init_tiers(&fx, &repository).await;
        let content = &fx.content;

        let mut seen = HashSet::new();
        let mut tx = repository.begin().await.unwrap();
        for _ in 0..10 {
            let (envelope, id) = content
                .encrypt_content(&mut *tx, b"repeat payload")
                .await
                .unwrap();
            assert!(seen.insert(id), "content key id {id} reused");
            assert_eq!(jose::parse(&envelope).unwrap().kid().unwrap(), id);
        }
    }

    #[tokio::test]
    async fn empty_plaintext_is_rejected() {
        let repository = InMemoryRepository::new();
        let fx = fixture();
        init_tiers(&fx, &repository).await;
        let content = &fx.content;

        let mut tx = repository.begin().await.unwrap();
        assert!(matches!(
            content.encrypt_content(&mut *tx, b"").await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            content.decrypt_content(&mut *tx, "").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn unknown_content_kid_is_not_found() {
        let repository = InMemoryRepository::new();
        let fx = fixture();
        init_tiers(&fx, &repository).await;
        let content = &fx.content;

        let generator = RandomKeyGenerator::new();
        let phantom = jose::seal(
            KeyAlg::A256Kw,
            &generator.generate_id(),
            generator.generate_key().unwrap().bytes(),
            b"payload",
        )
        .unwrap();

        let mut tx = repository.begin().await.unwrap();
        assert!(matches!(
            content.decrypt_content(&mut *tx, &phantom).await,
            Err(Error::NotFound {
                tier: Tier::Content,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn mismatched_stored_key_fails_decryption() {
        // Encrypt, then overwrite the stored content record's envelope with
        // a wrap of a different key. Decryption must fail, never succeed.
        let repository = InMemoryRepository::new();
        let fx = fixture();
        init_tiers(&fx, &repository).await;
        let content = &fx.content;

        let mut tx = repository.begin().await.unwrap();
        let (envelope, _id) = content
            .encrypt_content(&mut *tx, b"mismatch")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        // A different content key wrapped under the same intermediate
        let other = KeyMaterial::new([0x5a_u8; 32]);
        let mut tx = repository.begin().await.unwrap();
        let (wrong_wrap, _) = fx
            .intermediate
            .encrypt_key(&mut *tx, &other)
            .await
            .unwrap();

        struct RewiredTransaction {
            inner: Box<dyn KeyTransaction>,
            replacement: String,
        }

        #[async_trait::async_trait]
        impl KeyTransaction for RewiredTransaction {
            async fn latest(&mut self, tier: Tier) -> Result<KeyRecord> {
                self.inner.latest(tier).await
            }

            async fn get(&mut self, tier: Tier, id: KeyId) -> Result<KeyRecord> {
                let mut record = self.inner.get(tier, id).await?;
                if tier == Tier::Content {
                    record.encrypted = self.replacement.clone();
                }
                Ok(record)
            }

            async fn add(&mut self, tier: Tier, record: KeyRecord) -> Result<()> {
                self.inner.add(tier, record).await
            }

            async fn commit(self: Box<Self>) -> Result<()> {
                self.inner.commit().await
            }

            async fn rollback(self: Box<Self>) -> Result<()> {
                self.inner.rollback().await
            }
        }

        let mut rewired = RewiredTransaction {
            inner: repository.begin().await.unwrap(),
            replacement: wrong_wrap,
        };
        let result = content.decrypt_content(&mut rewired, &envelope).await;
        assert!(
            matches!(
                result,
                Err(Error::AuthenticatedDecryption(_)) | Err(Error::KeyWrap(_))
            ),
            "expected a decryption failure, got {result:?}"
        );
    }
}
