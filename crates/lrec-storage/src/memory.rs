//! In-process store with the same all-or-nothing day semantics as Postgres.
//!
//! A day transaction holds the store lock for its whole lifetime and works on
//! a private copy of the state; `commit` swaps that copy in.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use lrec_core::{ChangeEvent, CurrentStateRow, ListingKey, Snapshot, SnapshotRow};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{DayTransaction, ReconStore, RetractedRows, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    snapshots: BTreeMap<NaiveDate, Vec<SnapshotRow>>,
    changes: BTreeMap<NaiveDate, Vec<ChangeEvent>>,
    current: BTreeMap<ListingKey, CurrentStateRow>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconStore for MemoryStore {
    async fn begin_day(&self) -> Result<Box<dyn DayTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryDayTransaction { guard, staged }))
    }

    async fn snapshot(&self, day: NaiveDate) -> Result<Option<Vec<SnapshotRow>>, StoreError> {
        Ok(self.state.lock().await.snapshots.get(&day).cloned())
    }

    async fn changes(&self, day: NaiveDate) -> Result<Vec<ChangeEvent>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .changes
            .get(&day)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_state(&self) -> Result<Vec<CurrentStateRow>, StoreError> {
        Ok(self.state.lock().await.current.values().cloned().collect())
    }
}

struct MemoryDayTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl DayTransaction for MemoryDayTransaction {
    async fn retract_day(&mut self, day: NaiveDate) -> Result<RetractedRows, StoreError> {
        let snapshot_rows = self.staged.snapshots.remove(&day).map_or(0, |rows| rows.len());
        let change_rows = self.staged.changes.remove(&day).map_or(0, |rows| rows.len());
        Ok(RetractedRows {
            snapshot_rows: snapshot_rows as u64,
            change_rows: change_rows as u64,
        })
    }

    async fn insert_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut rows = snapshot.rows.clone();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].key == pair[1].key) {
            return Err(StoreError::Corrupt(format!(
                "duplicate snapshot key {} for {}",
                pair[0].key, snapshot.day
            )));
        }
        self.staged.snapshots.insert(snapshot.day, rows);
        Ok(())
    }

    async fn load_snapshot(&mut self, day: NaiveDate) -> Result<Option<Vec<SnapshotRow>>, StoreError> {
        Ok(self.staged.snapshots.get(&day).cloned())
    }

    async fn insert_changes(&mut self, events: &[ChangeEvent]) -> Result<(), StoreError> {
        for event in events {
            self.staged
                .changes
                .entry(event.day)
                .or_default()
                .push(event.clone());
        }
        Ok(())
    }

    async fn upsert_current(&mut self, rows: &[CurrentStateRow]) -> Result<(), StoreError> {
        for row in rows {
            self.staged.current.insert(row.key.clone(), row.clone());
        }
        Ok(())
    }

    async fn remove_current(&mut self, keys: &[ListingKey]) -> Result<u64, StoreError> {
        let removed = keys
            .iter()
            .filter(|key| self.staged.current.remove(*key).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryDayTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lrec_core::{Attribute, ListingPayload, ListingRecord};

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn snapshot(d: u32, ids: &[&str]) -> Snapshot {
        Snapshot::build(
            day(d),
            ids.iter().map(|id| {
                let payload = ListingPayload::default()
                    .with(Attribute::Region, "SP")
                    .with(Attribute::ListingId, *id);
                ListingRecord::from_payload(payload, "t.csv").unwrap()
            }),
        )
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = MemoryStore::new();
        let snap = snapshot(2, &["2", "1"]);

        let mut tx = store.begin_day().await.unwrap();
        tx.insert_snapshot(&snap).await.unwrap();
        let current: Vec<_> = snap
            .rows
            .iter()
            .map(|row| CurrentStateRow::from_snapshot_row(row, snap.day))
            .collect();
        tx.upsert_current(&current).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.snapshot(day(2)).await.unwrap().unwrap();
        let ids: Vec<&str> = stored.iter().map(|r| r.key.listing_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(store.current_state().await.unwrap().len(), 2);
        assert!(store.snapshot(day(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let mut tx = store.begin_day().await.unwrap();
        tx.insert_snapshot(&snapshot(2, &["1"])).await.unwrap();
        drop(tx);

        assert!(store.snapshot(day(2)).await.unwrap().is_none());
        assert!(store.current_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_snapshot_is_distinct_from_missing() {
        let store = MemoryStore::new();
        let mut tx = store.begin_day().await.unwrap();
        tx.insert_snapshot(&snapshot(2, &[])).await.unwrap();
        assert_eq!(tx.load_snapshot(day(2)).await.unwrap(), Some(Vec::new()));
        assert_eq!(tx.load_snapshot(day(1)).await.unwrap(), None);
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot(day(2)).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn retract_and_remove_report_counts() {
        let store = MemoryStore::new();
        let snap = snapshot(2, &["1", "2"]);
        let mut tx = store.begin_day().await.unwrap();
        tx.insert_snapshot(&snap).await.unwrap();
        let current: Vec<_> = snap
            .rows
            .iter()
            .map(|row| CurrentStateRow::from_snapshot_row(row, snap.day))
            .collect();
        tx.upsert_current(&current).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_day().await.unwrap();
        let retracted = tx.retract_day(day(2)).await.unwrap();
        assert_eq!(retracted.snapshot_rows, 2);
        assert_eq!(retracted.change_rows, 0);
        let removed = tx
            .remove_current(&[ListingKey::new("SP", "1"), ListingKey::new("SP", "9")])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        tx.commit().await.unwrap();

        assert!(store.snapshot(day(2)).await.unwrap().is_none());
        assert_eq!(store.current_state().await.unwrap().len(), 1);
    }
}
