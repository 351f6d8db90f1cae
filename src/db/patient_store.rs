use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};

use tbtrack_core::store::{ApplyCounts, ChangeFeed, RecordStore, Watermark, WriteBatch, WriteMode};
use tbtrack_core::{Patient, StoreError};

/// Record store backed by the `patients`, `tombstones` and `team_clock` tables.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PayloadRow {
    payload: String,
}

#[derive(sqlx::FromRow)]
struct HashRow {
    content_hash: String,
}

/// Maps sqlx errors; a busy database is reported as a write conflict.
pub(crate) fn store_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.code().as_deref(), Some("5") | Some("6")) {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(e.to_string())
}

fn decode(rows: Vec<PayloadRow>) -> Result<Vec<Patient>, StoreError> {
    rows.into_iter()
        .map(|r| serde_json::from_str(&r.payload).map_err(|e| StoreError::Backend(e.to_string())))
        .collect()
}

fn to_sql(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn clock(tx: &mut Transaction<'_, Sqlite>, team: &str) -> Result<u64, sqlx::Error> {
        let revision: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM team_clock WHERE team = ?")
                .bind(team)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(revision.map_or(0, |(r,)| r.max(0) as u64))
    }

    async fn apply_tx(&self, team: &str, batch: &WriteBatch) -> Result<ApplyCounts, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        // Write first so the transaction holds the write lock before reading
        sqlx::query("INSERT INTO team_clock (team, revision) VALUES (?, 0) ON CONFLICT(team) DO NOTHING")
            .bind(team)
            .execute(&mut *tx)
            .await?;
        let mut revision = Self::clock(&mut tx, team).await?;
        let mut counts = ApplyCounts::default();

        for uid in &batch.deletes {
            let removed = sqlx::query("DELETE FROM patients WHERE team = ? AND uid = ?")
                .bind(team)
                .bind(uid)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if removed == 0 {
                continue;
            }

            revision += 1;
            sqlx::query(
                r#"
                INSERT INTO tombstones (team, uid, revision, deleted_at) VALUES (?, ?, ?, ?)
                ON CONFLICT(team, uid) DO UPDATE SET revision = excluded.revision, deleted_at = excluded.deleted_at
                "#,
            )
            .bind(team)
            .bind(uid)
            .bind(to_sql(revision))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            counts.deleted += 1;
        }

        for patient in &batch.upserts {
            let hash = patient.fingerprint();
            let existing: Option<HashRow> =
                sqlx::query_as("SELECT content_hash FROM patients WHERE team = ? AND uid = ?")
                    .bind(team)
                    .bind(&patient.uid)
                    .fetch_optional(&mut *tx)
                    .await?;

            if let Some(row) = &existing {
                if batch.mode == WriteMode::InsertOnly || row.content_hash == hash {
                    continue;
                }
            }

            let payload = serde_json::to_string(patient)
                .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
            revision += 1;

            if existing.is_some() {
                sqlx::query(
                    r#"
                    UPDATE patients SET name = ?, payload = ?, content_hash = ?, revision = ?, updated_at = ?
                    WHERE team = ? AND uid = ?
                    "#,
                )
                .bind(&patient.name)
                .bind(&payload)
                .bind(&hash)
                .bind(to_sql(revision))
                .bind(&now)
                .bind(team)
                .bind(&patient.uid)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO patients (team, uid, name, payload, content_hash, revision, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(team)
                .bind(&patient.uid)
                .bind(&patient.name)
                .bind(&payload)
                .bind(&hash)
                .bind(to_sql(revision))
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM tombstones WHERE team = ? AND uid = ?")
                    .bind(team)
                    .bind(&patient.uid)
                    .execute(&mut *tx)
                    .await?;
            }
            counts.added += 1;
        }

        sqlx::query("UPDATE team_clock SET revision = ? WHERE team = ?")
            .bind(to_sql(revision))
            .bind(team)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(
            "sqlite store {}: +{} -{} (revision {})",
            team,
            counts.added,
            counts.deleted,
            revision
        );
        Ok(counts)
    }

    async fn changes_tx(&self, team: &str, since: Option<Watermark>) -> Result<ChangeFeed, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // The clock is read before any row so rows committed later are left
        // for the next pull.
        let current = Self::clock(&mut tx, team).await.map_err(store_err)?;
        let watermark = Watermark(current);
        let since = since.filter(|s| *s <= watermark);

        let feed = match since {
            None => {
                let rows: Vec<PayloadRow> = sqlx::query_as(
                    "SELECT payload FROM patients WHERE team = ? AND revision <= ? ORDER BY rowid",
                )
                .bind(team)
                .bind(to_sql(current))
                .fetch_all(&mut *tx)
                .await
                .map_err(store_err)?;

                ChangeFeed {
                    patients: decode(rows)?,
                    deleted: Vec::new(),
                    watermark,
                    full: true,
                }
            }
            Some(Watermark(since)) => {
                let rows: Vec<PayloadRow> = sqlx::query_as(
                    "SELECT payload FROM patients WHERE team = ? AND revision > ? AND revision <= ? ORDER BY rowid",
                )
                .bind(team)
                .bind(to_sql(since))
                .bind(to_sql(current))
                .fetch_all(&mut *tx)
                .await
                .map_err(store_err)?;

                let deleted: Vec<(String,)> = sqlx::query_as(
                    "SELECT uid FROM tombstones WHERE team = ? AND revision > ? AND revision <= ? ORDER BY revision",
                )
                .bind(team)
                .bind(to_sql(since))
                .bind(to_sql(current))
                .fetch_all(&mut *tx)
                .await
                .map_err(store_err)?;

                ChangeFeed {
                    patients: decode(rows)?,
                    deleted: deleted.into_iter().map(|(uid,)| uid).collect(),
                    watermark,
                    full: false,
                }
            }
        };

        tx.commit().await.map_err(store_err)?;
        Ok(feed)
    }
}

impl RecordStore for SqliteStore {
    async fn list(&self, team: &str) -> Result<Vec<Patient>, StoreError> {
        let rows: Vec<PayloadRow> =
            sqlx::query_as("SELECT payload FROM patients WHERE team = ? ORDER BY rowid")
                .bind(team)
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        decode(rows)
    }

    async fn get(&self, team: &str, uid: &str) -> Result<Option<Patient>, StoreError> {
        let row: Option<PayloadRow> =
            sqlx::query_as("SELECT payload FROM patients WHERE team = ? AND uid = ?")
                .bind(team)
                .bind(uid)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;

        match row {
            Some(row) => Ok(decode(vec![row])?.pop()),
            None => Ok(None),
        }
    }

    async fn changes_since(
        &self,
        team: &str,
        since: Option<Watermark>,
    ) -> Result<ChangeFeed, StoreError> {
        self.changes_tx(team, since).await
    }

    async fn apply(&self, team: &str, batch: &WriteBatch) -> Result<ApplyCounts, StoreError> {
        if batch.is_empty() {
            return Ok(ApplyCounts::default());
        }
        self.apply_tx(team, batch).await.map_err(store_err)
    }
}
