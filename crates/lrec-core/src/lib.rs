//! Core listing model, fingerprinting, and day-over-day diffing for LREC.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod diff;
pub mod fingerprint;

pub use diff::{changed_fields, diff_snapshots, DiffError, SnapshotDiff, SnapshotSide, UpdatedListing};
pub use fingerprint::{fingerprint, Fingerprint, FIELD_DELIMITER, FINGERPRINT_FIELDS};

pub const CRATE_NAME: &str = "lrec-core";

/// Canonical attribute set every source column is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    ListingId,
    Region,
    City,
    Neighborhood,
    Address,
    Price,
    AppraisalValue,
    Discount,
    Description,
    SaleModality,
    AccessLink,
}

impl Attribute {
    /// Payload order, mirroring the column order of the source exports.
    pub const ALL: [Attribute; 11] = [
        Attribute::ListingId,
        Attribute::Region,
        Attribute::City,
        Attribute::Neighborhood,
        Attribute::Address,
        Attribute::Price,
        Attribute::AppraisalValue,
        Attribute::Discount,
        Attribute::Description,
        Attribute::SaleModality,
        Attribute::AccessLink,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::ListingId => "listing_id",
            Attribute::Region => "region",
            Attribute::City => "city",
            Attribute::Neighborhood => "neighborhood",
            Attribute::Address => "address",
            Attribute::Price => "price",
            Attribute::AppraisalValue => "appraisal_value",
            Attribute::Discount => "discount",
            Attribute::Description => "description",
            Attribute::SaleModality => "sale_modality",
            Attribute::AccessLink => "access_link",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown attribute name `{0}`")]
pub struct UnknownAttribute(pub String);

impl FromStr for Attribute {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .into_iter()
            .find(|attr| attr.as_str() == s)
            .ok_or_else(|| UnknownAttribute(s.to_string()))
    }
}

/// Composite identity of one listing within a day: (region code, listing id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListingKey {
    pub region: String,
    pub listing_id: String,
}

impl ListingKey {
    pub fn new(region: impl Into<String>, listing_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            listing_id: listing_id.into(),
        }
    }
}

impl fmt::Display for ListingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.region, self.listing_id)
    }
}

/// Canonical attribute values for one listing. Missing attributes are `None`,
/// never a sentinel string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListingPayload {
    pub listing_id: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub address: Option<String>,
    pub price: Option<String>,
    pub appraisal_value: Option<String>,
    pub discount: Option<String>,
    pub description: Option<String>,
    pub sale_modality: Option<String>,
    pub access_link: Option<String>,
    /// Source columns no mapping rule recognised, keyed by their raw header.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ListingPayload {
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.slot(attribute).as_deref()
    }

    pub fn set(&mut self, attribute: Attribute, value: Option<String>) {
        *self.slot_mut(attribute) = value;
    }

    pub fn with(mut self, attribute: Attribute, value: impl Into<String>) -> Self {
        self.set(attribute, Some(value.into()));
        self
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn slot(&self, attribute: Attribute) -> &Option<String> {
        match attribute {
            Attribute::ListingId => &self.listing_id,
            Attribute::Region => &self.region,
            Attribute::City => &self.city,
            Attribute::Neighborhood => &self.neighborhood,
            Attribute::Address => &self.address,
            Attribute::Price => &self.price,
            Attribute::AppraisalValue => &self.appraisal_value,
            Attribute::Discount => &self.discount,
            Attribute::Description => &self.description,
            Attribute::SaleModality => &self.sale_modality,
            Attribute::AccessLink => &self.access_link,
        }
    }

    fn slot_mut(&mut self, attribute: Attribute) -> &mut Option<String> {
        match attribute {
            Attribute::ListingId => &mut self.listing_id,
            Attribute::Region => &mut self.region,
            Attribute::City => &mut self.city,
            Attribute::Neighborhood => &mut self.neighborhood,
            Attribute::Address => &mut self.address,
            Attribute::Price => &mut self.price,
            Attribute::AppraisalValue => &mut self.appraisal_value,
            Attribute::Discount => &mut self.discount,
            Attribute::Description => &mut self.description,
            Attribute::SaleModality => &mut self.sale_modality,
            Attribute::AccessLink => &mut self.access_link,
        }
    }
}

/// One normalized listing row plus the export it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub key: ListingKey,
    pub payload: ListingPayload,
    pub source_artifact: String,
}

impl ListingRecord {
    /// Builds a record whose key is read from the payload; `None` when either
    /// half of the key is absent or empty.
    pub fn from_payload(payload: ListingPayload, source_artifact: impl Into<String>) -> Option<Self> {
        let region = payload.region.as_deref().filter(|v| !v.is_empty())?;
        let listing_id = payload.listing_id.as_deref().filter(|v| !v.is_empty())?;
        Some(Self {
            key: ListingKey::new(region, listing_id),
            payload,
            source_artifact: source_artifact.into(),
        })
    }
}

/// A fingerprinted listing as stored in a day snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub key: ListingKey,
    pub payload: ListingPayload,
    pub fingerprint: Fingerprint,
    pub source_artifact: String,
}

impl From<ListingRecord> for SnapshotRow {
    fn from(record: ListingRecord) -> Self {
        let fingerprint = fingerprint(&record.payload);
        Self {
            key: record.key,
            payload: record.payload,
            fingerprint,
            source_artifact: record.source_artifact,
        }
    }
}

/// Every listing seen on one calendar day, unique by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub day: NaiveDate,
    pub rows: Vec<SnapshotRow>,
}

impl Snapshot {
    /// Fingerprints `records` and keeps the first row per key, preserving input order.
    pub fn build(day: NaiveDate, records: impl IntoIterator<Item = ListingRecord>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let rows = records
            .into_iter()
            .filter(|record| seen.insert(record.key.clone()))
            .map(SnapshotRow::from)
            .collect();
        Self { day, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &ListingKey) -> Option<&SnapshotRow> {
        self.rows.iter().find(|row| &row.key == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Enter,
    Exit,
    Update,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Enter => "ENTER",
            ChangeKind::Exit => "EXIT",
            ChangeKind::Update => "UPDATE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown change event type `{0}`")]
pub struct UnknownChangeKind(pub String);

impl FromStr for ChangeKind {
    type Err = UnknownChangeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTER" => Ok(ChangeKind::Enter),
            "EXIT" => Ok(ChangeKind::Exit),
            "UPDATE" => Ok(ChangeKind::Update),
            other => Err(UnknownChangeKind(other.to_string())),
        }
    }
}

/// One audit-trail entry produced by diffing a day against the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub day: NaiveDate,
    pub key: ListingKey,
    pub kind: ChangeKind,
    /// Only populated for `UPDATE`.
    pub changed_fields: Vec<Attribute>,
    pub before: Option<ListingPayload>,
    pub after: Option<ListingPayload>,
}

impl ChangeEvent {
    /// Comma-joined changed field names, `None` when nothing is listed.
    pub fn changed_fields_joined(&self) -> Option<String> {
        if self.changed_fields.is_empty() {
            return None;
        }
        Some(
            self.changed_fields
                .iter()
                .map(|attr| attr.as_str())
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Parses the comma-joined form produced by [`ChangeEvent::changed_fields_joined`].
pub fn parse_changed_fields(joined: Option<&str>) -> Result<Vec<Attribute>, UnknownAttribute> {
    match joined {
        None => Ok(Vec::new()),
        Some(text) => text
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Attribute::from_str)
            .collect(),
    }
}

/// Latest known state of a listing that is currently present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStateRow {
    pub key: ListingKey,
    pub payload: ListingPayload,
    pub fingerprint: Fingerprint,
    pub last_seen: NaiveDate,
    pub source_artifact: String,
}

impl CurrentStateRow {
    pub fn from_snapshot_row(row: &SnapshotRow, day: NaiveDate) -> Self {
        Self {
            key: row.key.clone(),
            payload: row.payload.clone(),
            fingerprint: row.fingerprint.clone(),
            last_seen: day,
            source_artifact: row.source_artifact.clone(),
        }
    }
}
