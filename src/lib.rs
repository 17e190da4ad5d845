//! # Barrier Encryption Library
//!
//! `keybarrier` provides a hierarchical envelope-encryption barrier between
//! callers and storage. It manages a three-tier chain of wrapping keys (root,
//! intermediate, content) rooted in an externally supplied unseal secret,
//! produces wire-exact JWE compact envelopes, and supports elastic rotation:
//! new key generations are appended on operator request while old generations
//! remain usable for decrypting historical ciphertext.
//!
//! Keys are persisted only in wrapped form. A root key is wrapped by the
//! unseal service, an intermediate key by the latest root, and a fresh
//! content key — one per encryption — by the latest intermediate. Plaintext
//! key material lives only on the stack of the operation that unwrapped it
//! and is zeroized on drop.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use keybarrier::barrier::Barrier;
//! use keybarrier::key::{KeyGenerator, RandomKeyGenerator};
//! use keybarrier::repository::InMemoryRepository;
//! use keybarrier::unseal::SimpleUnsealService;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create dependencies
//! let unseal_key = RandomKeyGenerator::new().generate_key()?;
//! let unseal = Arc::new(SimpleUnsealService::new(vec![unseal_key])?);
//! let repository = Arc::new(InMemoryRepository::new());
//!
//! // Build the barrier; the first build initializes the root and
//! // intermediate tiers on empty storage
//! let barrier = Barrier::builder()
//!     .with_unseal(unseal)
//!     .with_repository(repository)
//!     .build()
//!     .await?;
//!
//! // Encrypt data
//! let encrypted = barrier.encrypt_content(b"secret data").await?;
//!
//! // Decrypt data
//! let decrypted = barrier.decrypt_content(&encrypted.envelope).await?;
//! assert_eq!(decrypted, b"secret data");
//!
//! // Rotate the intermediate key; the old ciphertext stays decryptable
//! barrier
//!     .rotate_intermediate_key("scheduled quarterly rotation")
//!     .await?;
//! assert_eq!(barrier.decrypt_content(&encrypted.envelope).await?, b"secret data");
//!
//! // Release the unseal keys when done
//! barrier.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Shared-secret unsealing
//!
//! ```rust,no_run
//! use keybarrier::unseal::SharedSecretUnsealService;
//!
//! # fn shared_example() -> Result<(), Box<dyn std::error::Error>> {
//! // Any 2 of the 3 secrets can reconstruct a wrapping key
//! let unseal = SharedSecretUnsealService::new(
//!     vec![
//!         b"first operator secret".to_vec(),
//!         b"second operator secret".to_vec(),
//!         b"third operator secret".to_vec(),
//!     ],
//!     2,
//! )?;
//! # let _ = unseal;
//! # Ok(())
//! # }
//! ```

pub mod barrier;
pub mod error;
pub mod hierarchy;
pub mod id;
pub mod jose;
pub mod key;
pub mod log;
pub mod metrics;
pub mod repository;
pub mod rotation;
pub mod status;
pub mod unseal;
pub mod util;

// Re-export key types
pub use crate::barrier::{Barrier, BarrierBuilder, EncryptedContent};
pub use crate::error::{Error, Result};
pub use crate::id::{KeyId, Tier};
pub use crate::key::{KeyGenerator, KeyMaterial, RandomKeyGenerator};
pub use crate::log::{debug_enabled, set_logger, Logger, StdoutLogger};
pub use crate::metrics::{disable_metrics, metrics_enabled, set_metrics_provider, MetricsProvider};
pub use crate::repository::{KeyRecord, KeyRepository, KeyTransaction};
pub use crate::rotation::{RotationEngine, RotationOutcome};
pub use crate::status::{BarrierStatus, StatusReporter, TierStatus};
pub use crate::unseal::{SharedSecretUnsealService, SimpleUnsealService, UnsealService};

/// Size of AES-256 key in bytes
pub const AES256_KEY_SIZE: usize = 32;
