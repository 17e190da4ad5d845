//! In-memory implementation of the key repository
//!
//! Useful for tests and embedders that do not need durable storage. Each
//! transaction stages its writes locally and applies them under the write
//! lock at commit, re-checking id uniqueness so that of two concurrent
//! writers of the same id at most one commits.

use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};
use crate::repository::{validate_kek_shape, KeyRecord, KeyRepository, KeyTransaction};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Tables {
    root: BTreeMap<KeyId, KeyRecord>,
    intermediate: BTreeMap<KeyId, KeyRecord>,
    content: BTreeMap<KeyId, KeyRecord>,
}

impl Tables {
    fn table(&self, tier: Tier) -> &BTreeMap<KeyId, KeyRecord> {
        match tier {
            Tier::Root => &self.root,
            Tier::Intermediate => &self.intermediate,
            Tier::Content => &self.content,
        }
    }

    fn table_mut(&mut self, tier: Tier) -> &mut BTreeMap<KeyId, KeyRecord> {
        match tier {
            Tier::Root => &mut self.root,
            Tier::Intermediate => &mut self.intermediate,
            Tier::Content => &mut self.content,
        }
    }
}

/// An in-memory implementation of [`KeyRepository`]
#[derive(Debug)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRepository {
    /// Creates an empty repository
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyRepository for InMemoryRepository {
    async fn begin(&self) -> Result<Box<dyn KeyTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            tables: self.tables.clone(),
            staged: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    staged: Vec<(Tier, KeyRecord)>,
}

impl InMemoryTransaction {
    fn staged_get(&self, tier: Tier, id: KeyId) -> Option<&KeyRecord> {
        self.staged
            .iter()
            .filter(|(t, _)| *t == tier)
            .map(|(_, record)| record)
            .find(|record| record.id == id)
    }
}

#[async_trait]
impl KeyTransaction for InMemoryTransaction {
    async fn latest(&mut self, tier: Tier) -> Result<KeyRecord> {
        let tables = self.tables.read().unwrap();
        let committed = tables.table(tier).values().next_back();
        let staged = self
            .staged
            .iter()
            .filter(|(t, _)| *t == tier)
            .map(|(_, record)| record)
            .max_by_key(|record| record.id);

        match (committed, staged) {
            (None, None) => Err(Error::EmptyTier(tier)),
            (Some(c), None) => Ok(c.clone()),
            (None, Some(s)) => Ok(s.clone()),
            (Some(c), Some(s)) => Ok(if s.id > c.id { s.clone() } else { c.clone() }),
        }
    }

    async fn get(&mut self, tier: Tier, id: KeyId) -> Result<KeyRecord> {
        if let Some(record) = self.staged_get(tier, id) {
            return Ok(record.clone());
        }

        let tables = self.tables.read().unwrap();
        tables
            .table(tier)
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound { tier, id })
    }

    async fn add(&mut self, tier: Tier, record: KeyRecord) -> Result<()> {
        validate_kek_shape(tier, &record)?;

        if let (Some(parent), Some(kek_id)) = (tier.parent(), record.kek_id) {
            let known = self.staged_get(parent, kek_id).is_some()
                || self.tables.read().unwrap().table(parent).contains_key(&kek_id);
            if !known {
                return Err(Error::InvalidArgument(format!(
                    "kek_id {kek_id} does not reference a stored {parent} key"
                )));
            }
        }

        let duplicate = self.staged_get(tier, record.id).is_some()
            || self.tables.read().unwrap().table(tier).contains_key(&record.id);
        if duplicate {
            return Err(Error::Conflict {
                tier,
                id: record.id,
            });
        }

        self.staged.push((tier, record));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut tables = self.tables.write().unwrap();

        // Uniqueness is settled here, under the write lock
        for (tier, record) in &staged {
            if tables.table(*tier).contains_key(&record.id) {
                return Err(Error::Conflict {
                    tier: *tier,
                    id: record.id,
                });
            }
        }

        for (tier, record) in staged {
            tables.table_mut(tier).insert(record.id, record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
