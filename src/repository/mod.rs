//! Transactional key store
//!
//! The barrier persists one relation per tier (root, intermediate, content),
//! each keyed by a time-ordered id. All reads and writes happen inside a
//! transaction obtained from a [`KeyRepository`]; the scoped
//! [`with_transaction`] helper commits on success and rolls back on error so
//! a failed operation never leaves partial writes behind.

pub mod memory;
pub mod sql;

use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::InMemoryRepository;
pub use sql::{SqlClient, SqlDbType, SqlKeyRepository, SqlKeyRow, SqlTransaction, SqlValue};

/// A stored key record; the same shape serves all three tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Time-ordered record id; also the `kid` of envelopes this key wrapped
    pub id: KeyId,

    /// Encrypted envelope text; never plaintext key material
    pub encrypted: String,

    /// Id of the wrapping key one tier up; `None` for root keys
    pub kek_id: Option<KeyId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyRecord {
    /// Creates a record stamped with the current time
    pub fn new(id: KeyId, encrypted: String, kek_id: Option<KeyId>) -> Self {
        let now = Utc::now();
        Self {
            id,
            encrypted,
            kek_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Handle to a transactional key store
#[async_trait]
pub trait KeyRepository: Send + Sync + fmt::Debug {
    /// Opens a new transaction
    async fn begin(&self) -> Result<Box<dyn KeyTransaction>>;
}

/// A single transaction over the three key relations
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait KeyTransaction: Send {
    /// Returns the record with the maximum id in the tier
    ///
    /// An empty relation is [`Error::EmptyTier`], distinct from
    /// [`Error::NotFound`].
    async fn latest(&mut self, tier: Tier) -> Result<KeyRecord>;

    /// Returns the record with the given id
    async fn get(&mut self, tier: Tier, id: KeyId) -> Result<KeyRecord>;

    /// Stages a new record
    ///
    /// Fails with [`Error::Conflict`] on a duplicate id and with
    /// [`Error::InvalidArgument`] when the record's `kek_id` does not match
    /// the tier's parent contract.
    async fn add(&mut self, tier: Tier, record: KeyRecord) -> Result<()>;

    /// Commits all staged writes
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all staged writes
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Runs `body` inside a transaction, committing on success
///
/// On error the transaction is rolled back and the body's error is returned;
/// rollback failures are swallowed in favor of the original error.
pub async fn with_transaction<T, F>(repository: &dyn KeyRepository, body: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn KeyTransaction) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = repository.begin().await?;
    match body(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

/// Checks a record's `kek_id` against the tier's parent contract
pub(crate) fn validate_kek_shape(tier: Tier, record: &KeyRecord) -> Result<()> {
    match (tier.parent(), record.kek_id) {
        (None, Some(_)) => Err(Error::InvalidArgument(
            "root keys must not carry a kek_id".into(),
        )),
        (Some(parent), None) => Err(Error::InvalidArgument(format!(
            "{tier} keys require a kek_id referencing a {parent} key"
        ))),
        _ => Ok(()),
    }
}
