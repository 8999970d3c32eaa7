//! Persistence contract for day-level reconciliation writes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use lrec_core::{ChangeEvent, CurrentStateRow, ListingKey, Snapshot, SnapshotRow};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

/// Connection parameters handed to [`crate::PgStore::connect`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Rows removed by [`DayTransaction::retract_day`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetractedRows {
    pub snapshot_rows: u64,
    pub change_rows: u64,
}

/// Storage for snapshots, change events, and the current-state projection.
#[async_trait]
pub trait ReconStore: Send + Sync {
    /// Opens the single transaction that all writes for one day go through.
    async fn begin_day(&self) -> Result<Box<dyn DayTransaction>, StoreError>;

    /// Committed snapshot rows for `day` ordered by key, `None` if the day was
    /// never ingested.
    async fn snapshot(&self, day: NaiveDate) -> Result<Option<Vec<SnapshotRow>>, StoreError>;

    /// Committed change events for `day` in emission order.
    async fn changes(&self, day: NaiveDate) -> Result<Vec<ChangeEvent>, StoreError>;

    /// Current-state rows ordered by key.
    async fn current_state(&self) -> Result<Vec<CurrentStateRow>, StoreError>;
}

/// Writes for one day. Nothing is visible to readers until [`commit`];
/// dropping the transaction discards every staged write.
///
/// [`commit`]: DayTransaction::commit
#[async_trait]
pub trait DayTransaction: Send {
    /// Deletes any snapshot and change rows previously recorded for `day`.
    async fn retract_day(&mut self, day: NaiveDate) -> Result<RetractedRows, StoreError>;

    async fn insert_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Snapshot rows for `day` as seen inside this transaction.
    async fn load_snapshot(&mut self, day: NaiveDate) -> Result<Option<Vec<SnapshotRow>>, StoreError>;

    async fn insert_changes(&mut self, events: &[ChangeEvent]) -> Result<(), StoreError>;

    /// Inserts or replaces one current-state row per key.
    async fn upsert_current(&mut self, rows: &[CurrentStateRow]) -> Result<(), StoreError>;

    /// Deletes current-state rows for `keys`, returning how many existed.
    async fn remove_current(&mut self, keys: &[ListingKey]) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
