use chrono::Utc;
use sqlx::SqlitePool;

use tbtrack_core::sync::{DeviceSlot, StagedBatch, StagingArea};
use tbtrack_core::StoreError;

use super::patient_store::store_err;

/// Persists staging areas, one `staging_slots` row per (team, device).
#[derive(Debug, Clone)]
pub struct StagingRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    device: String,
    origin: Option<String>,
    pushes: i64,
    batch: Option<String>,
}

impl SlotRow {
    fn into_slot(self) -> Result<DeviceSlot, StoreError> {
        let batch: Option<StagedBatch> = self
            .batch
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| StoreError::Backend(format!("staged batch of {}: {}", self.device, e)))?;

        Ok(DeviceSlot {
            device: self.device,
            origin: self.origin,
            pushes: u32::try_from(self.pushes).unwrap_or(0),
            batch,
        })
    }
}

impl StagingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, team: &str) -> Result<StagingArea, StoreError> {
        let rows: Vec<SlotRow> = sqlx::query_as(
            "SELECT device, origin, pushes, batch FROM staging_slots WHERE team = ? ORDER BY device",
        )
        .bind(team)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let slots = rows
            .into_iter()
            .map(SlotRow::into_slot)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StagingArea::from_slots(slots))
    }

    /// Writes every slot of `area` in one transaction.
    pub async fn save(&self, team: &str, area: &StagingArea) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now().to_rfc3339();

        for slot in area.slots() {
            let batch = slot
                .batch
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO staging_slots (team, device, origin, pushes, batch, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(team, device) DO UPDATE SET
                    origin = excluded.origin,
                    pushes = excluded.pushes,
                    batch = excluded.batch,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(team)
            .bind(&slot.device)
            .bind(&slot.origin)
            .bind(i64::from(slot.pushes))
            .bind(&batch)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)
    }

    /// Teams that have at least one slot.
    pub async fn teams(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT team FROM staging_slots ORDER BY team")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use tbtrack_core::sync::{classify, DeviceFilter};
    use tbtrack_core::{Patient, Regime};

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, pool) = test_pool().await;
        let repo = StagingRepository::new(pool);

        let mut area = StagingArea::new();
        let incoming = vec![Patient::new("A", Regime::Cr).with_uid("a")];
        area.stage(
            "phone",
            classify(&[], &incoming, &["x".to_string()], "phone"),
            Some("192.168.1.7".to_string()),
        );
        repo.save("DEFAULT", &area).await.unwrap();

        let loaded = repo.load("DEFAULT").await.unwrap();
        assert_eq!(
            loaded.get_staged(&DeviceFilter::All),
            area.get_staged(&DeviceFilter::All)
        );
        assert_eq!(loaded.slot("phone").unwrap().origin.as_deref(), Some("192.168.1.7"));
        assert!(repo.load("other").await.unwrap().is_empty());
        assert_eq!(repo.teams().await.unwrap(), vec!["DEFAULT".to_string()]);
    }

    #[tokio::test]
    async fn test_consumed_batch_is_cleared() {
        let (_dir, pool) = test_pool().await;
        let repo = StagingRepository::new(pool);

        let mut area = StagingArea::new();
        let incoming = vec![Patient::new("A", Regime::Cr).with_uid("a")];
        area.stage("phone", classify(&[], &incoming, &[], "phone"), None);
        repo.save("DEFAULT", &area).await.unwrap();

        let batch_id = area.batch("phone").unwrap().batch_id;
        area.consume("phone", batch_id, &[0]);
        repo.save("DEFAULT", &area).await.unwrap();

        let loaded = repo.load("DEFAULT").await.unwrap();
        assert!(loaded.batch("phone").is_none());
        assert_eq!(loaded.slot("phone").unwrap().pushes, 1);
    }
}
