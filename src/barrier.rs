//! Barrier facade
//!
//! Composes the unseal service, repository, and the three tier services in
//! dependency order, guards initialization, and exposes the public
//! operations: content encryption and decryption, rotation, and status.

use crate::error::{Error, Result};
use crate::hierarchy::{ContentKeyService, IntermediateKeyService, RootKeyService};
use crate::id::KeyId;
use crate::key::{KeyGenerator, RandomKeyGenerator};
use crate::repository::{with_transaction, KeyRepository, KeyTransaction};
use crate::rotation::{validate_reason, RotationEngine, RotationOutcome};
use crate::status::{BarrierStatus, StatusReporter};
use crate::unseal::UnsealService;

use ::metrics::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// The result of encrypting a payload
#[derive(Debug, Clone)]
pub struct EncryptedContent {
    /// JWE compact envelope carrying the ciphertext
    pub envelope: String,

    /// Id of the single-use content key that sealed the payload
    pub content_key_id: KeyId,
}

/// The composed barrier
pub struct Barrier {
    repository: Arc<dyn KeyRepository>,
    unseal: Arc<dyn UnsealService>,
    content: Arc<ContentKeyService>,
    rotation: RotationEngine,
    status: StatusReporter,
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("repository", &self.repository)
            .field("unseal", &self.unseal)
            .finish()
    }
}

/// Builder for [`Barrier`]
#[derive(Default)]
pub struct BarrierBuilder {
    unseal: Option<Arc<dyn UnsealService>>,
    repository: Option<Arc<dyn KeyRepository>>,
    generator: Option<Arc<dyn KeyGenerator>>,
}

impl BarrierBuilder {
    /// Creates a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unseal service
    pub fn with_unseal(mut self, unseal: Arc<dyn UnsealService>) -> Self {
        self.unseal = Some(unseal);
        self
    }

    /// Sets the key repository
    pub fn with_repository(mut self, repository: Arc<dyn KeyRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Sets the key generator; defaults to [`RandomKeyGenerator`]
    pub fn with_key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Validates dependencies and initializes the barrier
    pub async fn build(self) -> Result<Barrier> {
        let unseal = self
            .unseal
            .ok_or_else(|| Error::InvalidArgument("unseal service is required".to_string()))?;
        let repository = self
            .repository
            .ok_or_else(|| Error::InvalidArgument("repository is required".to_string()))?;
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(RandomKeyGenerator::new()));

        Barrier::initialize(unseal, repository, generator).await
    }
}

impl Barrier {
    /// Creates a new barrier using the builder pattern
    pub fn builder() -> BarrierBuilder {
        BarrierBuilder::new()
    }

    async fn initialize(
        unseal: Arc<dyn UnsealService>,
        repository: Arc<dyn KeyRepository>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Result<Self> {
        let root = Arc::new(RootKeyService::new(unseal.clone(), generator.clone()));
        {
            let root = root.clone();
            with_transaction(repository.as_ref(), |tx: &mut dyn KeyTransaction| {
                Box::pin(async move { root.init(&mut *tx).await })
            })
            .await
            .map_err(|e| Error::during_init("root key tier initialization failed", e))?;
        }

        let intermediate = Arc::new(IntermediateKeyService::new(
            root.clone(),
            generator.clone(),
        ));
        {
            let intermediate = intermediate.clone();
            with_transaction(repository.as_ref(), |tx: &mut dyn KeyTransaction| {
                Box::pin(async move { intermediate.init(&mut *tx).await })
            })
            .await
            .map_err(|e| {
                Error::during_init("intermediate key tier initialization failed", e)
            })?;
        }

        let content = Arc::new(ContentKeyService::new(
            intermediate.clone(),
            generator.clone(),
        ));
        let rotation = RotationEngine::new(
            repository.clone(),
            unseal.clone(),
            root,
            intermediate,
            generator,
        );
        let status = StatusReporter::new(repository.clone());

        Ok(Self {
            repository,
            unseal,
            content,
            rotation,
            status,
        })
    }

    /// Encrypts a payload under a fresh content key
    pub async fn encrypt_content(&self, plaintext: &[u8]) -> Result<EncryptedContent> {
        let start = Instant::now();
        counter!("barrier.encrypt", 1);

        let content = self.content.clone();
        let plaintext = plaintext.to_vec();
        let result = with_transaction(self.repository.as_ref(), |tx: &mut dyn KeyTransaction| {
            Box::pin(async move { content.encrypt_content(&mut *tx, &plaintext).await })
        })
        .await;

        histogram!("barrier.encrypt.time", start.elapsed());
        result.map(|(envelope, content_key_id)| EncryptedContent {
            envelope,
            content_key_id,
        })
    }

    /// Decrypts a payload envelope
    pub async fn decrypt_content(&self, envelope: &str) -> Result<Vec<u8>> {
        let start = Instant::now();
        counter!("barrier.decrypt", 1);

        let content = self.content.clone();
        let envelope = envelope.to_string();
        let result = with_transaction(self.repository.as_ref(), |tx: &mut dyn KeyTransaction| {
            Box::pin(async move { content.decrypt_content(&mut *tx, &envelope).await })
        })
        .await;

        histogram!("barrier.decrypt.time", start.elapsed());
        result
    }

    /// Writes a new root key generation
    ///
    /// The reason is validated before any transaction is begun.
    pub async fn rotate_root_key(&self, reason: &str) -> Result<RotationOutcome> {
        validate_reason(reason)?;
        self.rotation.rotate_root_key(reason).await
    }

    /// Writes a new intermediate key generation
    pub async fn rotate_intermediate_key(&self, reason: &str) -> Result<RotationOutcome> {
        validate_reason(reason)?;
        self.rotation.rotate_intermediate_key(reason).await
    }

    /// Writes a new content key
    pub async fn rotate_content_key(&self, reason: &str) -> Result<RotationOutcome> {
        validate_reason(reason)?;
        self.rotation.rotate_content_key(reason).await
    }

    /// Reports the latest root and intermediate generations
    pub async fn status(&self) -> Result<BarrierStatus> {
        self.status.report().await
    }

    /// Shuts down the unseal service, releasing its cached wrapping keys
    pub async fn shutdown(&self) -> Result<()> {
        self.unseal.shutdown().await
    }
}
