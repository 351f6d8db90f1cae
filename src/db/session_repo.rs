use chrono::Utc;
use sqlx::SqlitePool;

use tbtrack_core::store::Watermark;
use tbtrack_core::sync::SyncSession;
use tbtrack_core::StoreError;

use super::patient_store::store_err;

/// Persists client sync sessions in `sync_state`.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    host: Option<String>,
    watermark: Option<i64>,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Loads the session for (team, device), or a fresh one.
    pub async fn load(&self, team: &str, device: &str) -> Result<SyncSession, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT host, watermark FROM sync_state WHERE team = ? AND device = ?")
                .bind(team)
                .bind(device)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;

        let mut session = SyncSession::new(device, team);
        if let Some(row) = row {
            session.host = row.host;
            session.watermark = row
                .watermark
                .and_then(|w| u64::try_from(w).ok())
                .map(Watermark);
        }
        Ok(session)
    }

    pub async fn save(&self, session: &SyncSession) -> Result<(), StoreError> {
        let watermark = session
            .watermark
            .map(|w| i64::try_from(w.0).unwrap_or(i64::MAX));

        sqlx::query(
            r#"
            INSERT INTO sync_state (team, device, host, watermark, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(team, device) DO UPDATE SET
                host = excluded.host,
                watermark = excluded.watermark,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.team)
        .bind(&session.device)
        .bind(&session.host)
        .bind(watermark)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}
