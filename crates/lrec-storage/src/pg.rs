//! PostgreSQL store. Queries are runtime-checked (`sqlx::query`, not the
//! `query!` macros) so building never needs a live database.

use async_trait::async_trait;
use chrono::NaiveDate;
use lrec_core::{
    parse_changed_fields, ChangeEvent, ChangeKind, CurrentStateRow, Fingerprint, ListingKey,
    ListingPayload, Snapshot, SnapshotRow,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;

use crate::store::{DayTransaction, ReconStore, RetractedRows, StoreConfig, StoreError};

/// Rows per multi-row INSERT; keeps bind parameters well under the
/// protocol limit of 65535.
const INSERT_CHUNK: usize = 1_000;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded migrations under `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ReconStore for PgStore {
    async fn begin_day(&self) -> Result<Box<dyn DayTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgDayTransaction { tx }))
    }

    async fn snapshot(&self, day: NaiveDate) -> Result<Option<Vec<SnapshotRow>>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_snapshot(&mut *conn, day).await
    }

    async fn changes(&self, day: NaiveDate) -> Result<Vec<ChangeEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT day, region, listing_id, event_type, changed_field_names,
                   before_payload, after_payload
              FROM changes
             WHERE day = $1
             ORDER BY seq
            "#,
        )
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn current_state(&self) -> Result<Vec<CurrentStateRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT region, listing_id, payload, fingerprint, last_seen, source_artifact
              FROM current_listings
             ORDER BY region COLLATE "C", listing_id COLLATE "C"
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<CurrentStateRow, StoreError> {
                Ok(CurrentStateRow {
                    key: key_from_row(row)?,
                    payload: payload_from_value(row.try_get("payload")?)?,
                    fingerprint: Fingerprint::from_hex(row.try_get::<String, _>("fingerprint")?),
                    last_seen: row.try_get("last_seen")?,
                    source_artifact: row.try_get("source_artifact")?,
                })
            })
            .collect()
    }
}

pub struct PgDayTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DayTransaction for PgDayTransaction {
    async fn retract_day(&mut self, day: NaiveDate) -> Result<RetractedRows, StoreError> {
        let change_rows = sqlx::query("DELETE FROM changes WHERE day = $1")
            .bind(day)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        let snapshot_rows = sqlx::query("DELETE FROM snapshot_listings WHERE day = $1")
            .bind(day)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM snapshot_days WHERE day = $1")
            .bind(day)
            .execute(&mut *self.tx)
            .await?;
        debug!(%day, snapshot_rows, change_rows, "retracted prior day rows");
        Ok(RetractedRows {
            snapshot_rows,
            change_rows,
        })
    }

    async fn insert_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO snapshot_days (day, row_count) VALUES ($1, $2)")
            .bind(snapshot.day)
            .bind(snapshot.rows.len() as i64)
            .execute(&mut *self.tx)
            .await?;

        for chunk in snapshot.rows.chunks(INSERT_CHUNK) {
            let payloads = chunk
                .iter()
                .map(|row| row.payload.to_json())
                .collect::<Result<Vec<_>, _>>()?;
            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO snapshot_listings \
                 (day, region, listing_id, payload, fingerprint, source_artifact) ",
            );
            query.push_values(chunk.iter().zip(payloads), |mut b, (row, payload)| {
                b.push_bind(snapshot.day)
                    .push_bind(row.key.region.clone())
                    .push_bind(row.key.listing_id.clone())
                    .push_bind(payload)
                    .push_bind(row.fingerprint.as_str().to_string())
                    .push_bind(row.source_artifact.clone());
            });
            query.build().execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn load_snapshot(&mut self, day: NaiveDate) -> Result<Option<Vec<SnapshotRow>>, StoreError> {
        fetch_snapshot(&mut *self.tx, day).await
    }

    /// Events keep their slice order through a table-wide increasing `seq`.
    async fn insert_changes(&mut self, events: &[ChangeEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let next_seq: i64 = sqlx::query("SELECT COALESCE(MAX(seq) + 1, 0) AS next_seq FROM changes")
            .fetch_one(&mut *self.tx)
            .await?
            .try_get("next_seq")?;

        for (chunk_index, chunk) in events.chunks(INSERT_CHUNK).enumerate() {
            let mut encoded = Vec::with_capacity(chunk.len());
            for (offset, event) in chunk.iter().enumerate() {
                let seq = next_seq + (chunk_index * INSERT_CHUNK + offset) as i64;
                let before = event.before.as_ref().map(ListingPayload::to_json).transpose()?;
                let after = event.after.as_ref().map(ListingPayload::to_json).transpose()?;
                encoded.push((seq, event, before, after));
            }

            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO changes \
                 (day, seq, region, listing_id, event_type, changed_field_names, before_payload, after_payload) ",
            );
            query.push_values(encoded, |mut b, (seq, event, before, after)| {
                b.push_bind(event.day)
                    .push_bind(seq)
                    .push_bind(event.key.region.clone())
                    .push_bind(event.key.listing_id.clone())
                    .push_bind(event.kind.as_str())
                    .push_bind(event.changed_fields_joined())
                    .push_bind(before)
                    .push_bind(after);
            });
            query.build().execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn upsert_current(&mut self, rows: &[CurrentStateRow]) -> Result<(), StoreError> {
        for chunk in rows.chunks(INSERT_CHUNK) {
            let payloads = chunk
                .iter()
                .map(|row| row.payload.to_json())
                .collect::<Result<Vec<_>, _>>()?;
            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO current_listings \
                 (region, listing_id, payload, fingerprint, last_seen, source_artifact) ",
            );
            query.push_values(chunk.iter().zip(payloads), |mut b, (row, payload)| {
                b.push_bind(row.key.region.clone())
                    .push_bind(row.key.listing_id.clone())
                    .push_bind(payload)
                    .push_bind(row.fingerprint.as_str().to_string())
                    .push_bind(row.last_seen)
                    .push_bind(row.source_artifact.clone());
            });
            query.push(
                " ON CONFLICT (region, listing_id) DO UPDATE SET \
                 payload = EXCLUDED.payload, \
                 fingerprint = EXCLUDED.fingerprint, \
                 last_seen = EXCLUDED.last_seen, \
                 source_artifact = EXCLUDED.source_artifact",
            );
            query.build().execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn remove_current(&mut self, keys: &[ListingKey]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let regions: Vec<String> = keys.iter().map(|k| k.region.clone()).collect();
        let ids: Vec<String> = keys.iter().map(|k| k.listing_id.clone()).collect();
        let removed = sqlx::query(
            r#"
            DELETE FROM current_listings c
             USING UNNEST($1::text[], $2::text[]) AS k(region, listing_id)
             WHERE c.region = k.region
               AND c.listing_id = k.listing_id
            "#,
        )
        .bind(regions)
        .bind(ids)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

async fn fetch_snapshot(
    conn: &mut sqlx::PgConnection,
    day: NaiveDate,
) -> Result<Option<Vec<SnapshotRow>>, StoreError> {
    let recorded = sqlx::query("SELECT row_count FROM snapshot_days WHERE day = $1")
        .bind(day)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(recorded) = recorded else {
        return Ok(None);
    };
    let expected: i64 = recorded.try_get("row_count")?;

    let rows = sqlx::query(
        r#"
        SELECT region, listing_id, payload, fingerprint, source_artifact
          FROM snapshot_listings
         WHERE day = $1
         ORDER BY region COLLATE "C", listing_id COLLATE "C"
        "#,
    )
    .bind(day)
    .fetch_all(&mut *conn)
    .await?;

    if rows.len() as i64 != expected {
        return Err(StoreError::Corrupt(format!(
            "snapshot {day} records {expected} rows but {} are stored",
            rows.len()
        )));
    }

    rows.iter()
        .map(|row| -> Result<SnapshotRow, StoreError> {
            Ok(SnapshotRow {
                key: key_from_row(row)?,
                payload: payload_from_value(row.try_get("payload")?)?,
                fingerprint: Fingerprint::from_hex(row.try_get::<String, _>("fingerprint")?),
                source_artifact: row.try_get("source_artifact")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()
        .map(Some)
}

fn key_from_row(row: &PgRow) -> Result<ListingKey, StoreError> {
    Ok(ListingKey::new(
        row.try_get::<String, _>("region")?,
        row.try_get::<String, _>("listing_id")?,
    ))
}

fn payload_from_value(value: serde_json::Value) -> Result<ListingPayload, StoreError> {
    Ok(serde_json::from_value(value)?)
}

fn change_from_row(row: &PgRow) -> Result<ChangeEvent, StoreError> {
    let kind_label: String = row.try_get("event_type")?;
    let kind = kind_label
        .parse::<ChangeKind>()
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let joined: Option<String> = row.try_get("changed_field_names")?;
    let changed_fields = parse_changed_fields(joined.as_deref())
        .map_err(|err| StoreError::Corrupt(err.to_string()))?;
    let before: Option<serde_json::Value> = row.try_get("before_payload")?;
    let after: Option<serde_json::Value> = row.try_get("after_payload")?;

    Ok(ChangeEvent {
        day: row.try_get("day")?,
        key: key_from_row(row)?,
        kind,
        changed_fields,
        before: before.map(payload_from_value).transpose()?,
        after: after.map(payload_from_value).transpose()?,
    })
}
