//! Day-over-day snapshot diff.
//!
//! [`diff_snapshots`] partitions `yesterday.keys ∪ today.keys` into entered,
//! exited, updated and unchanged listings. Each key lands in exactly one
//! bucket and every bucket is ordered by key, so the emitted change events
//! are deterministic for a given pair of inputs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

use crate::fingerprint::FINGERPRINT_FIELDS;
use crate::{Attribute, ChangeEvent, ChangeKind, ListingKey, ListingPayload, SnapshotRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSide {
    Yesterday,
    Today,
}

impl fmt::Display for SnapshotSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSide::Yesterday => f.write_str("yesterday"),
            SnapshotSide::Today => f.write_str("today"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("listing key {key} appears more than once in {side}'s snapshot")]
    DuplicateKey { key: ListingKey, side: SnapshotSide },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedListing {
    pub before: SnapshotRow,
    pub after: SnapshotRow,
    pub changed_fields: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub entered: Vec<SnapshotRow>,
    pub exited: Vec<SnapshotRow>,
    pub updated: Vec<UpdatedListing>,
    pub unchanged: Vec<ListingKey>,
    /// False when there was no previous snapshot to compare against.
    pub yesterday_found: bool,
}

impl SnapshotDiff {
    pub fn exited_keys(&self) -> Vec<ListingKey> {
        self.exited.iter().map(|row| row.key.clone()).collect()
    }

    /// Change events for `day`: all ENTERs, then EXITs, then UPDATEs.
    pub fn change_events(&self, day: NaiveDate) -> Vec<ChangeEvent> {
        let entered = self.entered.iter().map(|row| ChangeEvent {
            day,
            key: row.key.clone(),
            kind: ChangeKind::Enter,
            changed_fields: Vec::new(),
            before: None,
            after: Some(row.payload.clone()),
        });
        let exited = self.exited.iter().map(|row| ChangeEvent {
            day,
            key: row.key.clone(),
            kind: ChangeKind::Exit,
            changed_fields: Vec::new(),
            before: Some(row.payload.clone()),
            after: None,
        });
        let updated = self.updated.iter().map(|item| ChangeEvent {
            day,
            key: item.after.key.clone(),
            kind: ChangeKind::Update,
            changed_fields: item.changed_fields.clone(),
            before: Some(item.before.payload.clone()),
            after: Some(item.after.payload.clone()),
        });
        entered.chain(exited).chain(updated).collect()
    }
}

/// Classifies every key of `yesterday ∪ today`.
///
/// `yesterday = None` means no snapshot exists for the previous day; every
/// listing of `today` is then an ENTER and nothing exits or updates.
///
/// # Errors
///
/// `DuplicateKey` if either side holds two rows with the same key.
pub fn diff_snapshots(
    yesterday: Option<&[SnapshotRow]>,
    today: &[SnapshotRow],
) -> Result<SnapshotDiff, DiffError> {
    let today_index = index_rows(today, SnapshotSide::Today)?;
    let yesterday_index = match yesterday {
        Some(rows) => index_rows(rows, SnapshotSide::Yesterday)?,
        None => BTreeMap::new(),
    };

    let mut diff = SnapshotDiff {
        yesterday_found: yesterday.is_some(),
        ..SnapshotDiff::default()
    };

    for (key, after) in &today_index {
        match yesterday_index.get(key) {
            None => diff.entered.push((*after).clone()),
            Some(before) if before.fingerprint == after.fingerprint => {
                diff.unchanged.push((*key).clone())
            }
            Some(before) => diff.updated.push(UpdatedListing {
                changed_fields: changed_fields(&before.payload, &after.payload),
                before: (*before).clone(),
                after: (*after).clone(),
            }),
        }
    }

    for (key, before) in &yesterday_index {
        if !today_index.contains_key(key) {
            diff.exited.push((*before).clone());
        }
    }

    Ok(diff)
}

/// Tracked attributes whose trimmed text differs; a missing value compares
/// equal to an empty one.
pub fn changed_fields(before: &ListingPayload, after: &ListingPayload) -> Vec<Attribute> {
    FINGERPRINT_FIELDS
        .into_iter()
        .filter(|attr| {
            let b = before.get(*attr).map(str::trim).unwrap_or("");
            let a = after.get(*attr).map(str::trim).unwrap_or("");
            a != b
        })
        .collect()
}

fn index_rows(
    rows: &[SnapshotRow],
    side: SnapshotSide,
) -> Result<BTreeMap<&ListingKey, &SnapshotRow>, DiffError> {
    let mut index = BTreeMap::new();
    for row in rows {
        if index.insert(&row.key, row).is_some() {
            return Err(DiffError::DuplicateKey {
                key: row.key.clone(),
                side,
            });
        }
    }
    Ok(index)
}
