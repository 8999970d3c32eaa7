//! Parquet export of a committed day for read-only consumers.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::NaiveDate;
use lrec_core::{Attribute, ChangeEvent, CurrentStateRow, ListingPayload, SnapshotRow};
use lrec_storage::{ArtifactStore, ReconStore};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tokio::fs;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub day: NaiveDate,
    pub files: Vec<ExportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `snapshot`, `changes`, and `current_state` Parquet files plus a
/// `manifest.json` into `<reports_root>/<day>/snapshots/`.
pub async fn export_day(
    store: &dyn ReconStore,
    reports_root: &Path,
    day: NaiveDate,
) -> Result<std::path::PathBuf> {
    let snapshot = store
        .snapshot(day)
        .await
        .with_context(|| format!("loading snapshot for {day}"))?
        .with_context(|| format!("no snapshot recorded for {day}"))?;
    let changes = store
        .changes(day)
        .await
        .with_context(|| format!("loading change events for {day}"))?;
    let current = store.current_state().await.context("loading current state")?;

    let day_dir = reports_root.join(day.to_string());
    let snapshot_dir = day_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let snapshot_path = snapshot_dir.join("snapshot.parquet");
    let changes_path = snapshot_dir.join("changes.parquet");
    let current_path = snapshot_dir.join("current_state.parquet");

    write_parquet(&snapshot_path, snapshot_batch(&snapshot)?)?;
    write_parquet(&changes_path, changes_batch(&changes)?)?;
    write_parquet(&current_path, current_batch(&current)?)?;

    let manifest = ExportManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        day,
        files: vec![
            manifest_entry("snapshot", &day_dir, &snapshot_path, snapshot.len())?,
            manifest_entry("changes", &day_dir, &changes_path, changes.len())?,
            manifest_entry("current_state", &day_dir, &current_path, current.len())?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

/// Payload attributes exported as their own columns; key columns come first
/// separately.
const PAYLOAD_COLUMNS: [Attribute; 9] = [
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

struct Columns {
    fields: Vec<ArrowField>,
    arrays: Vec<ArrayRef>,
}

impl Columns {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            arrays: Vec::new(),
        }
    }

    fn text<'a>(&mut self, name: &str, values: impl IntoIterator<Item = &'a str>) {
        let array = StringArray::from(values.into_iter().map(Some).collect::<Vec<_>>());
        self.fields.push(ArrowField::new(name, DataType::Utf8, false));
        self.arrays.push(Arc::new(array));
    }

    fn nullable_text(&mut self, name: &str, values: Vec<Option<String>>) {
        self.fields.push(ArrowField::new(name, DataType::Utf8, true));
        self.arrays.push(Arc::new(StringArray::from(values)));
    }

    fn payload_attributes(&mut self, payloads: &[&ListingPayload]) -> Result<()> {
        for attribute in PAYLOAD_COLUMNS {
            self.nullable_text(
                attribute.as_str(),
                payloads
                    .iter()
                    .map(|p| p.get(attribute).map(str::to_string))
                    .collect(),
            );
        }
        let extras = payloads
            .iter()
            .map(|p| {
                if p.extra.is_empty() {
                    Ok(None)
                } else {
                    serde_json::to_string(&p.extra).map(Some)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .context("serializing extra columns")?;
        self.nullable_text("extra_json", extras);
        Ok(())
    }

    fn into_batch(self, what: &str) -> Result<RecordBatch> {
        RecordBatch::try_new(Arc::new(Schema::new(self.fields)), self.arrays)
            .with_context(|| format!("building {what} record batch"))
    }
}

fn snapshot_batch(rows: &[SnapshotRow]) -> Result<RecordBatch> {
    let mut columns = Columns::new();
    columns.text("region", rows.iter().map(|r| r.key.region.as_str()));
    columns.text("listing_id", rows.iter().map(|r| r.key.listing_id.as_str()));
    columns.payload_attributes(&rows.iter().map(|r| &r.payload).collect::<Vec<_>>())?;
    columns.text("fingerprint", rows.iter().map(|r| r.fingerprint.as_str()));
    columns.text("source_artifact", rows.iter().map(|r| r.source_artifact.as_str()));
    columns.into_batch("snapshot")
}

fn changes_batch(events: &[ChangeEvent]) -> Result<RecordBatch> {
    let to_json = |payload: &Option<ListingPayload>| {
        payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("serializing change payload")
    };
    let before = events
        .iter()
        .map(|e| to_json(&e.before))
        .collect::<Result<Vec<_>>>()?;
    let after = events
        .iter()
        .map(|e| to_json(&e.after))
        .collect::<Result<Vec<_>>>()?;
    let days = events.iter().map(|e| e.day.to_string()).collect::<Vec<_>>();

    let mut columns = Columns::new();
    columns.text("day", days.iter().map(String::as_str));
    columns.text("region", events.iter().map(|e| e.key.region.as_str()));
    columns.text("event_type", events.iter().map(|e| e.kind.as_str()));
    columns.text("listing_id", events.iter().map(|e| e.key.listing_id.as_str()));
    columns.nullable_text(
        "changed_field_names",
        events.iter().map(ChangeEvent::changed_fields_joined).collect(),
    );
    columns.nullable_text("before_payload", before);
    columns.nullable_text("after_payload", after);
    columns.into_batch("changes")
}

fn current_batch(rows: &[CurrentStateRow]) -> Result<RecordBatch> {
    let last_seen = rows.iter().map(|r| r.last_seen.to_string()).collect::<Vec<_>>();

    let mut columns = Columns::new();
    columns.text("region", rows.iter().map(|r| r.key.region.as_str()));
    columns.text("listing_id", rows.iter().map(|r| r.key.listing_id.as_str()));
    columns.payload_attributes(&rows.iter().map(|r| &r.payload).collect::<Vec<_>>())?;
    columns.text("fingerprint", rows.iter().map(|r| r.fingerprint.as_str()));
    columns.text("last_seen", last_seen.iter().map(String::as_str));
    columns.text("source_artifact", rows.iter().map(|r| r.source_artifact.as_str()));
    columns.into_batch("current_state")
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, base: &Path, path: &Path, rows: usize) -> Result<ExportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(base)
        .unwrap_or(path)
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(ExportManifestFile {
        name: name.to_string(),
        path: rel,
        rows,
        sha256: ArtifactStore::sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
