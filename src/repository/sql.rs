//! SQL-backed key repository
//!
//! The barrier does not bind to a particular database driver. Instead it
//! speaks to a [`SqlClient`] the embedder implements for its driver of
//! choice; queries are built here, with `?` placeholders converted to the
//! dialect's format. Expected schema, one table per tier
//! (`root_key`, `intermediate_key`, `content_key`):
//!
//! ```sql
//! id TEXT PRIMARY KEY, encrypted TEXT NOT NULL, kek_id TEXT,
//! created_at INTEGER, updated_at INTEGER
//! ```
//!
//! Timestamps are unix milliseconds. Ordering `id` lexicographically equals
//! time order because ids are fixed-width lowercase hex.

use crate::error::{Error, Result};
use crate::id::{KeyId, Tier};
use crate::repository::{validate_kek_shape, KeyRecord, KeyRepository, KeyTransaction};

use async_trait::async_trait;
use chrono::TimeZone;
use chrono::Utc;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

const LOAD_KEY_QUERY: &str =
    "SELECT id, encrypted, kek_id, created_at, updated_at FROM {table} WHERE id = ?";
const LOAD_LATEST_QUERY: &str =
    "SELECT id, encrypted, kek_id, created_at, updated_at FROM {table} ORDER BY id DESC LIMIT 1";
const STORE_KEY_QUERY: &str =
    "INSERT INTO {table} (id, encrypted, kek_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)";

/// Database dialect for placeholder conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDbType {
    /// MySQL database
    MySql,

    /// PostgreSQL database
    Postgres,

    /// Oracle database
    Oracle,

    /// SQL Server database
    SqlServer,
}

impl SqlDbType {
    /// Converts `?` placeholders to the database-specific format
    fn convert_placeholders(&self, sql: &str) -> String {
        let rewrite = |prefix: &str| {
            let re = Regex::new(r"\?").expect("Failed to create regex pattern for SQL placeholders");
            let mut counter = 0;
            re.replace_all(sql, |_: &regex::Captures<'_>| {
                counter += 1;
                format!("{prefix}{counter}")
            })
            .to_string()
        };

        match self {
            SqlDbType::MySql => sql.to_string(),
            SqlDbType::Postgres => rewrite("$"),
            SqlDbType::Oracle => rewrite(":"),
            SqlDbType::SqlServer => rewrite("@p"),
        }
    }
}

/// A positional query parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    OptText(Option<String>),
    Int(i64),
}

/// One row of a key table, as the driver returns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlKeyRow {
    pub id: String,
    pub encrypted: String,
    pub kek_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Driver seam: opens transactions against the embedder's database
#[async_trait]
pub trait SqlClient: Send + Sync + fmt::Debug {
    /// Begins a transaction; serializable or stronger is expected
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>>;
}

/// Driver seam: a single open transaction
#[async_trait]
pub trait SqlTransaction: Send {
    /// Runs a single-row query, returning the row if any
    async fn query_key_row(
        &mut self,
        query: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqlKeyRow>>;

    /// Runs a statement, returning the number of affected rows
    async fn execute(&mut self, query: &str, params: &[SqlValue]) -> Result<u64>;

    /// Commits the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls the transaction back
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone)]
struct TierQueries {
    load: String,
    load_latest: String,
    store: String,
}

impl TierQueries {
    fn build(tier: Tier, db_type: SqlDbType) -> Self {
        let for_table = |query: &str| {
            db_type.convert_placeholders(&query.replace("{table}", tier.table_name()))
        };
        Self {
            load: for_table(LOAD_KEY_QUERY),
            load_latest: for_table(LOAD_LATEST_QUERY),
            store: for_table(STORE_KEY_QUERY),
        }
    }
}

/// SQL implementation of [`KeyRepository`]
#[derive(Debug)]
pub struct SqlKeyRepository {
    client: Arc<dyn SqlClient>,
    queries: Arc<[TierQueries; 3]>,
}

fn tier_index(tier: Tier) -> usize {
    match tier {
        Tier::Root => 0,
        Tier::Intermediate => 1,
        Tier::Content => 2,
    }
}

impl SqlKeyRepository {
    /// Creates a repository over the given client and dialect
    pub fn new(client: Arc<dyn SqlClient>, db_type: SqlDbType) -> Self {
        let queries = [
            TierQueries::build(Tier::Root, db_type),
            TierQueries::build(Tier::Intermediate, db_type),
            TierQueries::build(Tier::Content, db_type),
        ];
        Self {
            client,
            queries: Arc::new(queries),
        }
    }
}

#[async_trait]
impl KeyRepository for SqlKeyRepository {
    async fn begin(&self) -> Result<Box<dyn KeyTransaction>> {
        let tx = self.client.begin().await?;
        Ok(Box::new(SqlKeyTransaction {
            tx,
            queries: self.queries.clone(),
        }))
    }
}

struct SqlKeyTransaction {
    tx: Box<dyn SqlTransaction>,
    queries: Arc<[TierQueries; 3]>,
}

impl SqlKeyTransaction {
    fn queries_for(&self, tier: Tier) -> &TierQueries {
        &self.queries[tier_index(tier)]
    }
}

fn row_to_record(tier: Tier, row: SqlKeyRow) -> Result<KeyRecord> {
    let corrupt = |what: &str| Error::Storage(format!("corrupt {tier} key row: {what}"));

    let id = KeyId::parse(&row.id).map_err(|_| corrupt("id"))?;
    let kek_id = match row.kek_id {
        Some(text) => Some(KeyId::parse(&text).map_err(|_| corrupt("kek_id"))?),
        None => None,
    };
    let created_at = Utc
        .timestamp_millis_opt(row.created_at)
        .single()
        .ok_or_else(|| corrupt("created_at"))?;
    let updated_at = Utc
        .timestamp_millis_opt(row.updated_at)
        .single()
        .ok_or_else(|| corrupt("updated_at"))?;

    Ok(KeyRecord {
        id,
        encrypted: row.encrypted,
        kek_id,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl KeyTransaction for SqlKeyTransaction {
    async fn latest(&mut self, tier: Tier) -> Result<KeyRecord> {
        let query = self.queries_for(tier).load_latest.clone();
        let row = self.tx.query_key_row(&query, &[]).await?;
        match row {
            Some(row) => row_to_record(tier, row),
            None => Err(Error::EmptyTier(tier)),
        }
    }

    async fn get(&mut self, tier: Tier, id: KeyId) -> Result<KeyRecord> {
        let query = self.queries_for(tier).load.clone();
        let row = self
            .tx
            .query_key_row(&query, &[SqlValue::Text(id.to_string())])
            .await?;
        match row {
            Some(row) => row_to_record(tier, row),
            None => Err(Error::NotFound { tier, id }),
        }
    }

    async fn add(&mut self, tier: Tier, record: KeyRecord) -> Result<()> {
        validate_kek_shape(tier, &record)?;

        if let (Some(parent), Some(kek_id)) = (tier.parent(), record.kek_id) {
            let query = self.queries_for(parent).load.clone();
            let found = self
                .tx
                .query_key_row(&query, &[SqlValue::Text(kek_id.to_string())])
                .await?;
            if found.is_none() {
                return Err(Error::InvalidArgument(format!(
                    "kek_id {kek_id} does not reference a stored {parent} key"
                )));
            }
        }

        let load = self.queries_for(tier).load.clone();
        let existing = self
            .tx
            .query_key_row(&load, &[SqlValue::Text(record.id.to_string())])
            .await?;
        if existing.is_some() {
            return Err(Error::Conflict {
                tier,
                id: record.id,
            });
        }

        let store = self.queries_for(tier).store.clone();
        let params = [
            SqlValue::Text(record.id.to_string()),
            SqlValue::Text(record.encrypted),
            SqlValue::OptText(record.kek_id.map(|id| id.to_string())),
            SqlValue::Int(record.created_at.timestamp_millis()),
            SqlValue::Int(record.updated_at.timestamp_millis()),
        ];
        let affected = self.tx.execute(&store, &params).await?;
        if affected != 1 {
            return Err(Error::Storage(format!(
                "insert into {} affected {affected} rows",
                tier.table_name()
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await
    }
}
