//! Rotation engine
//!
//! Rotation is elastic: each operation appends a new generation to one tier
//! and never updates, deletes, or re-wraps existing records, so ciphertext
//! produced before a rotation stays decryptable indefinitely. Every rotation
//! runs in its own transaction and is labelled with an operator-supplied
//! reason.

use crate::debugf;
use crate::error::{Error, Result};
use crate::hierarchy::{IntermediateKeyService, RootKeyService};
use crate::id::{KeyId, Tier};
use crate::key::KeyGenerator;
use crate::repository::{with_transaction, KeyRecord, KeyRepository, KeyTransaction};
use crate::unseal::UnsealService;

use chrono::{DateTime, Utc};
use ::metrics::counter;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Minimum length of a rotation reason, in characters
pub const REASON_MIN_LEN: usize = 10;

/// Maximum length of a rotation reason, in characters
pub const REASON_MAX_LEN: usize = 500;

/// The result of a rotation
#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    /// Id of the generation that was latest before the rotation; absent for
    /// content rotations, which have no "latest"
    pub old_id: Option<KeyId>,

    /// Id of the newly written generation
    pub new_id: KeyId,

    /// The operator-supplied reason
    pub reason: String,

    /// Rotation time, serialized as unix milliseconds for the admin surface
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub rotated_at: DateTime<Utc>,
}

/// Produces new key generations on operator request
pub struct RotationEngine {
    repository: Arc<dyn KeyRepository>,
    unseal: Arc<dyn UnsealService>,
    root: Arc<RootKeyService>,
    intermediate: Arc<IntermediateKeyService>,
    generator: Arc<dyn KeyGenerator>,
}

impl fmt::Debug for RotationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationEngine")
            .field("repository", &self.repository)
            .field("unseal", &self.unseal)
            .finish()
    }
}

/// Checks an operator reason against the length bounds
///
/// The engine itself does not validate reasons; callers (the barrier facade
/// and the external admin surface) run this check before a transaction is
/// begun.
pub fn validate_reason(reason: &str) -> Result<()> {
    let length = reason.chars().count();
    if !(REASON_MIN_LEN..=REASON_MAX_LEN).contains(&length) {
        return Err(Error::InvalidArgument(format!(
            "rotation reason must be {REASON_MIN_LEN} to {REASON_MAX_LEN} characters, got {length}"
        )));
    }
    Ok(())
}

impl RotationEngine {
    /// Creates the engine over its collaborators
    pub fn new(
        repository: Arc<dyn KeyRepository>,
        unseal: Arc<dyn UnsealService>,
        root: Arc<RootKeyService>,
        intermediate: Arc<IntermediateKeyService>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            repository,
            unseal,
            root,
            intermediate,
            generator,
        }
    }

    /// Writes a new root key generation
    ///
    /// Requires an initialized root tier; existing intermediates keep
    /// pointing at the generations that wrapped them.
    pub async fn rotate_root_key(&self, reason: &str) -> Result<RotationOutcome> {
        counter!("barrier.rotation.root", 1);

        let generator = self.generator.clone();
        let unseal = self.unseal.clone();
        let outcome = with_transaction(self.repository.as_ref(), |tx: &mut dyn KeyTransaction| {
            Box::pin(async move {
                let old = tx.latest(Tier::Root).await?;

                let new_id = generator.generate_id();
                let key = generator.generate_key()?;
                let sealed = unseal.encrypt_key(&key).await?;
                tx.add(Tier::Root, KeyRecord::new(new_id, sealed, None))
                    .await?;

                Ok((old.id, new_id))
            })
        })
        .await?;

        debugf!("rotated root key: {} -> {}", outcome.0, outcome.1);
        Ok(RotationOutcome {
            old_id: Some(outcome.0),
            new_id: outcome.1,
            reason: reason.to_string(),
            rotated_at: Utc::now(),
        })
    }

    /// Writes a new intermediate key generation wrapped under the current
    /// root
    ///
    /// The old intermediate and the root that wraps the new one are read in
    /// the same transaction, so the pair is a consistent snapshot even under
    /// a concurrent root rotation.
    pub async fn rotate_intermediate_key(&self, reason: &str) -> Result<RotationOutcome> {
        counter!("barrier.rotation.intermediate", 1);

        let generator = self.generator.clone();
        let root = self.root.clone();
        let outcome = with_transaction(self.repository.as_ref(), |tx: &mut dyn KeyTransaction| {
            Box::pin(async move {
                let old = tx.latest(Tier::Intermediate).await?;

                let new_id = generator.generate_id();
                let key = generator.generate_key()?;
                let (sealed, root_id) = root.encrypt_key(&mut *tx, &key).await?;
                tx.add(
                    Tier::Intermediate,
                    KeyRecord::new(new_id, sealed, Some(root_id)),
                )
                .await?;

                Ok((old.id, new_id))
            })
        })
        .await?;

        debugf!(
            "rotated intermediate key: {} -> {}",
            outcome.0,
            outcome.1
        );
        Ok(RotationOutcome {
            old_id: Some(outcome.0),
            new_id: outcome.1,
            reason: reason.to_string(),
            rotated_at: Utc::now(),
        })
    }

    /// Writes a new content key wrapped under the current intermediate
    ///
    /// The intermediate is recovered through the root that actually wraps it
    /// (the root named by its envelope), not the latest root. Content has no
    /// "latest", so the outcome carries no old id.
    pub async fn rotate_content_key(&self, reason: &str) -> Result<RotationOutcome> {
        counter!("barrier.rotation.content", 1);

        let generator = self.generator.clone();
        let intermediate = self.intermediate.clone();
        let new_id = with_transaction(self.repository.as_ref(), |tx: &mut dyn KeyTransaction| {
            Box::pin(async move {
                let new_id = generator.generate_id();
                let key = generator.generate_key()?;
                let (sealed, intermediate_id) =
                    intermediate.encrypt_key(&mut *tx, &key).await?;
                tx.add(
                    Tier::Content,
                    KeyRecord::new(new_id, sealed, Some(intermediate_id)),
                )
                .await?;
                Ok(new_id)
            })
        })
        .await?;

        debugf!("rotated content key: {}", new_id);
        Ok(RotationOutcome {
            old_id: None,
            new_id,
            reason: reason.to_string(),
            rotated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::ContentKeyService;
    use crate::key::RandomKeyGenerator;
    use crate::repository::InMemoryRepository;
    use crate::unseal::SimpleUnsealService;

    const REASON: &str = "scheduled rotation";

    struct Fixture {
        repository: Arc<InMemoryRepository>,
        root: Arc<RootKeyService>,
        intermediate: Arc<IntermediateKeyService>,
        content: ContentKeyService,
        engine: RotationEngine,
    }

    fn fixture() -> Fixture {
        let generator = Arc::new(RandomKeyGenerator::new());
        let unseal_key = generator.generate_key().unwrap();
        let unseal: Arc<dyn UnsealService> =
            Arc::new(SimpleUnsealService::new(vec![unseal_key]).unwrap());
        let repository = Arc::new(InMemoryRepository::new());
        let root = Arc::new(RootKeyService::new(unseal.clone(), generator.clone()));
        let intermediate = Arc::new(IntermediateKeyService::new(
            root.clone(),
            generator.clone(),
        ));
        let content = ContentKeyService::new(intermediate.clone(), generator.clone());
        let engine = RotationEngine::new(
            repository.clone(),
            unseal,
            root.clone(),
            intermediate.clone(),
            generator,
        );
        Fixture {
            repository,
            root,
            intermediate,
            content,
            engine,
        }
    }

    async fn init_tiers(fx: &Fixture) {
        let mut tx = fx.repository.begin().await.unwrap();
        fx.root.init(&mut *tx).await.unwrap();
        fx.intermediate.init(&mut *tx).await.unwrap();
        tx.commit().await.unwrap();
    }

    async fn latest_id(fx: &Fixture, tier: Tier) -> KeyId {
        let mut tx = fx.repository.begin().await.unwrap();
        tx.latest(tier).await.unwrap().id
    }

    #[tokio::test]
    async fn rotate_root_appends_a_generation() {
        let fx = fixture();
        init_tiers(&fx).await;

        let before = latest_id(&fx, Tier::Root).await;
        let outcome = fx.engine.rotate_root_key(REASON).await.unwrap();

        assert_eq!(outcome.old_id, Some(before));
        assert!(outcome.new_id > before);
        assert_eq!(outcome.reason, REASON);

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("rotated_at").unwrap().is_i64());

        // Both generations remain readable
        let mut tx = fx.repository.begin().await.unwrap();
        assert_eq!(tx.get(Tier::Root, before).await.unwrap().id, before);
        assert_eq!(tx.latest(Tier::Root).await.unwrap().id, outcome.new_id);
    }

    #[tokio::test]
    async fn rotate_intermediate_wraps_under_current_root() {
        let fx = fixture();
        init_tiers(&fx).await;

        // Rotate the root first; the new intermediate must point at the new
        // root generation
        let root_outcome = fx.engine.rotate_root_key(REASON).await.unwrap();
        let outcome = fx.engine.rotate_intermediate_key(REASON).await.unwrap();

        let mut tx = fx.repository.begin().await.unwrap();
        let record = tx.get(Tier::Intermediate, outcome.new_id).await.unwrap();
        assert_eq!(record.kek_id, Some(root_outcome.new_id));
        assert!(outcome.old_id.unwrap() < outcome.new_id);
    }

    #[tokio::test]
    async fn rotate_content_has_no_old_id() {
        let fx = fixture();
        init_tiers(&fx).await;

        let outcome = fx.engine.rotate_content_key(REASON).await.unwrap();
        assert_eq!(outcome.old_id, None);

        let mut tx = fx.repository.begin().await.unwrap();
        let record = tx.get(Tier::Content, outcome.new_id).await.unwrap();
        let intermediate_id = tx.latest(Tier::Intermediate).await.unwrap().id;
        assert_eq!(record.kek_id, Some(intermediate_id));
    }

    #[tokio::test]
    async fn rotation_on_empty_tier_writes_nothing() {
        let fx = fixture();

        assert!(matches!(
            fx.engine.rotate_root_key(REASON).await,
            Err(Error::EmptyTier(Tier::Root))
        ));
        assert!(matches!(
            fx.engine.rotate_intermediate_key(REASON).await,
            Err(Error::EmptyTier(Tier::Intermediate))
        ));
        assert!(matches!(
            fx.engine.rotate_content_key(REASON).await,
            Err(Error::EmptyTier(Tier::Intermediate))
        ));

        let mut tx = fx.repository.begin().await.unwrap();
        assert!(matches!(
            tx.latest(Tier::Root).await,
            Err(Error::EmptyTier(_))
        ));
        assert!(matches!(
            tx.latest(Tier::Content).await,
            Err(Error::EmptyTier(_))
        ));
    }

    #[test]
    fn reason_length_bounds() {
        assert!(matches!(
            validate_reason("short"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(validate_reason(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            validate_reason(&"x".repeat(501)),
            Err(Error::InvalidArgument(_))
        ));
        validate_reason(&"r".repeat(10)).unwrap();
        validate_reason(&"r".repeat(500)).unwrap();
        validate_reason(REASON).unwrap();
    }

    #[tokio::test]
    async fn old_ciphertext_survives_all_rotations() {
        let fx = fixture();
        init_tiers(&fx).await;

        let mut tx = fx.repository.begin().await.unwrap();
        let (envelope, _) = fx
            .content
            .encrypt_content(&mut *tx, b"pre-rotation payload")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        fx.engine.rotate_root_key(REASON).await.unwrap();
        fx.engine.rotate_intermediate_key(REASON).await.unwrap();
        fx.engine.rotate_content_key(REASON).await.unwrap();

        let mut tx = fx.repository.begin().await.unwrap();
        let opened = fx
            .content
            .decrypt_content(&mut *tx, &envelope)
            .await
            .unwrap();
        assert_eq!(opened, b"pre-rotation payload");
    }
}
