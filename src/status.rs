//! Status reporter
//!
//! A read-only snapshot of the latest root and intermediate generations.
//! The content tier is never reported because content keys have no "latest".

use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};
use crate::repository::{with_transaction, KeyRecord, KeyRepository, KeyTransaction};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Metadata of the latest generation in one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStatus {
    pub id: KeyId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<KeyRecord> for TierStatus {
    fn from(record: KeyRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Snapshot of the barrier's key generations
#[derive(Debug, Clone, Serialize)]
pub struct BarrierStatus {
    pub root: Option<TierStatus>,
    pub intermediate: Option<TierStatus>,
}

/// Read-only reporter over the repository
pub struct StatusReporter {
    repository: Arc<dyn KeyRepository>,
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("repository", &self.repository)
            .finish()
    }
}

async fn latest_or_none(tx: &mut dyn KeyTransaction, tier: Tier) -> Result<Option<TierStatus>> {
    match tx.latest(tier).await {
        Ok(record) => Ok(Some(record.into())),
        Err(Error::EmptyTier(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

impl StatusReporter {
    /// Creates the reporter over the repository
    pub fn new(repository: Arc<dyn KeyRepository>) -> Self {
        Self { repository }
    }

    /// Reads the latest root and intermediate generations in one transaction
    pub async fn report(&self) -> Result<BarrierStatus> {
        with_transaction(self.repository.as_ref(), |tx: &mut dyn KeyTransaction| {
            Box::pin(async move {
                let root = latest_or_none(&mut *tx, Tier::Root).await?;
                let intermediate = latest_or_none(&mut *tx, Tier::Intermediate).await?;
                Ok(BarrierStatus { root, intermediate })
            })
        })
        .await
    }
}
