use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tbtrack_core::sync::{DeviceInfo, StagingArea};
use tbtrack_core::StoreError;

use crate::db::StagingRepository;

/// Per-team staging areas, each behind its own lock.
///
/// An area is loaded from the database the first time its team is touched
/// and written back by the caller after every change.
pub struct TeamRegistry {
    repo: StagingRepository,
    areas: Mutex<HashMap<String, Arc<Mutex<StagingArea>>>>,
}

impl TeamRegistry {
    pub fn new(repo: StagingRepository) -> Self {
        Self {
            repo,
            areas: Mutex::new(HashMap::new()),
        }
    }

    /// Locks the staging area of `team`. Held for a whole stage or commit.
    pub async fn lock(&self, team: &str) -> Result<OwnedMutexGuard<StagingArea>, StoreError> {
        let area = {
            let mut areas = self.areas.lock().await;
            match areas.get(team) {
                Some(area) => Arc::clone(area),
                None => {
                    let loaded = Arc::new(Mutex::new(self.repo.load(team).await?));
                    tracing::debug!("loaded staging area for team {}", team);
                    areas.insert(team.to_string(), Arc::clone(&loaded));
                    loaded
                }
            }
        };
        Ok(area.lock_owned().await)
    }

    /// Writes `area` back to the database.
    ///
    /// If the write fails, `area` is reloaded from the database so memory
    /// and disk keep agreeing. If that fails too the team is evicted and
    /// reloaded on its next lock.
    pub async fn save(&self, team: &str, area: &mut StagingArea) -> Result<(), StoreError> {
        let Err(e) = self.repo.save(team, area).await else {
            return Ok(());
        };
        tracing::error!("saving staging area of {} failed: {}", team, e);

        match self.repo.load(team).await {
            Ok(saved) => *area = saved,
            Err(reload) => {
                tracing::error!("reloading staging area of {} failed: {}", team, reload);
                self.areas.lock().await.remove(team);
            }
        }
        Err(e)
    }

    /// Device rows of every team with staging history, tagged by team.
    pub async fn devices(&self) -> Result<Vec<(String, DeviceInfo)>, StoreError> {
        let mut teams = self.repo.teams().await?;
        for team in self.areas.lock().await.keys() {
            if !teams.contains(team) {
                teams.push(team.clone());
            }
        }
        teams.sort();

        let mut devices = Vec::new();
        for team in teams {
            let area = self.lock(&team).await?;
            devices.extend(
                area.pending_devices()
                    .into_iter()
                    .map(|d| (team.clone(), d)),
            );
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use tbtrack_core::sync::{classify, DEFAULT_TEAM};
    use tbtrack_core::{Patient, Regime};

    #[tokio::test]
    async fn test_lock_loads_saved_area() {
        let (_dir, pool) = test_pool().await;
        let incoming = vec![Patient::new("A", Regime::Ir).with_uid("a")];

        let first = TeamRegistry::new(StagingRepository::new(pool.clone()));
        {
            let mut area = first.lock(DEFAULT_TEAM).await.unwrap();
            area.stage("phone", classify(&[], &incoming, &[], "phone"), None);
            first.save(DEFAULT_TEAM, &mut area).await.unwrap();
        }

        let second = TeamRegistry::new(StagingRepository::new(pool));
        let area = second.lock(DEFAULT_TEAM).await.unwrap();
        assert_eq!(area.batch("phone").unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_restores_saved_area() {
        let (_dir, pool) = test_pool().await;
        let incoming = vec![Patient::new("A", Regime::Ir).with_uid("a")];
        let registry = TeamRegistry::new(StagingRepository::new(pool.clone()));

        let mut area = registry.lock(DEFAULT_TEAM).await.unwrap();
        area.stage("phone", classify(&[], &incoming, &[], "phone"), None);
        registry.save(DEFAULT_TEAM, &mut area).await.unwrap();
        let batch_id = area.batch("phone").unwrap().batch_id;

        sqlx::query(
            "CREATE TRIGGER slots_read_only BEFORE UPDATE ON staging_slots \
             BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let restaged = vec![Patient::new("B", Regime::Cr).with_uid("b")];
        area.stage("phone", classify(&[], &restaged, &[], "phone"), None);
        assert!(registry.save(DEFAULT_TEAM, &mut area).await.is_err());

        let batch = area.batch("phone").unwrap();
        assert_eq!(batch.batch_id, batch_id);
        assert_eq!(batch.records[0].uid(), "a");
    }

    #[tokio::test]
    async fn test_devices_lists_unsaved_teams() {
        let (_dir, pool) = test_pool().await;
        let registry = TeamRegistry::new(StagingRepository::new(pool));
        {
            let mut area = registry.lock("north").await.unwrap();
            area.stage("tablet", Vec::new(), Some("10.0.0.4".to_string()));
        }

        let devices = registry.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].0, "north");
        assert_eq!(devices[0].1.ip.as_deref(), Some("10.0.0.4"));
        assert!(!devices[0].1.has_pending);
    }
}
