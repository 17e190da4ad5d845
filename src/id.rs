//! Key identifiers and tier names
//!
//! Every key record is addressed by a time-ordered 128-bit id. The canonical
//! text form is the hyphenated lowercase rendering (36 characters), which is
//! also the `kid` value embedded in envelope headers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The length of a canonical key id string
pub const KEY_ID_STR_LEN: usize = 36;

/// A time-ordered 128-bit key identifier
///
/// Ordering on `KeyId` is the byte ordering of the underlying id, which for
/// v7-style ids coincides with creation order. "Latest" selection within a
/// tier relies on this ordering alone, never on wall-clock timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
    /// Wraps a raw uuid
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds a key id from raw big-endian bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parses the canonical 36-character hyphenated lowercase form
    ///
    /// Any other rendering (braced, simple, uppercase) is rejected so that a
    /// `kid` round-trips byte-exactly through an envelope header.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != KEY_ID_STR_LEN {
            return Err(Error::KidMalformed(format!(
                "expected {} characters, got {}",
                KEY_ID_STR_LEN,
                s.len()
            )));
        }

        let uuid =
            Uuid::try_parse(s).map_err(|e| Error::KidMalformed(format!("{s:?}: {e}")))?;

        let id = Self(uuid);
        if id.to_string() != s {
            return Err(Error::KidMalformed(format!("{s:?} is not in canonical form")));
        }

        Ok(id)
    }

    /// Returns the underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Uuid's Display is the hyphenated lowercase form
        self.0.fmt(f)
    }
}

/// One of the three key tiers, ordered root > intermediate > content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Root,
    Intermediate,
    Content,
}

impl Tier {
    /// The relation name used by SQL-backed repositories
    pub fn table_name(&self) -> &'static str {
        match self {
            Tier::Root => "root_key",
            Tier::Intermediate => "intermediate_key",
            Tier::Content => "content_key",
        }
    }

    /// The parent tier whose keys wrap this tier, if any
    pub fn parent(&self) -> Option<Tier> {
        match self {
            Tier::Root => None,
            Tier::Intermediate => Some(Tier::Root),
            Tier::Content => Some(Tier::Intermediate),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Root => "root",
            Tier::Intermediate => "intermediate",
            Tier::Content => "content",
        };
        f.write_str(name)
    }
}
