use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{ApplyCounts, ChangeFeed, RecordStore, Watermark, WriteBatch, WriteMode};
use crate::error::StoreError;
use crate::models::Patient;

#[derive(Debug, Clone)]
struct Entry {
    patient: Patient,
    revision: u64,
}

#[derive(Debug, Default)]
struct TeamRecords {
    revision: u64,
    entries: Vec<Entry>,
    tombstones: HashMap<String, u64>,
}

impl TeamRecords {
    fn position(&self, uid: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.patient.uid == uid)
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// In-memory record store.
///
/// Used as a client-side cache and in tests. A single mutex guards all teams,
/// so every call observes and produces a consistent snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    teams: Mutex<HashMap<String, TeamRecords>>,
    #[cfg(test)]
    poisoned: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `patients` for `team`.
    pub async fn with_patients(team: &str, patients: Vec<Patient>) -> Result<Self, StoreError> {
        let store = Self::new();
        let mut batch = WriteBatch::new(WriteMode::Overwrite);
        batch.upserts = patients;
        store.apply(team, &batch).await?;
        Ok(store)
    }

    /// Makes any write touching `uid` fail with a conflict.
    #[cfg(test)]
    pub(crate) fn poison(&self, uid: &str) {
        if let Ok(mut poisoned) = self.poisoned.lock() {
            poisoned.insert(uid.to_string());
        }
    }

    #[cfg(test)]
    fn check_poisoned(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let poisoned = self
            .poisoned
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let touched = batch
            .deletes
            .iter()
            .chain(batch.upserts.iter().map(|p| &p.uid));
        for uid in touched {
            if poisoned.contains(uid) {
                return Err(StoreError::Conflict(format!("write to {} rejected", uid)));
            }
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_poisoned(&self, _batch: &WriteBatch) -> Result<(), StoreError> {
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    async fn list(&self, team: &str) -> Result<Vec<Patient>, StoreError> {
        let teams = self.teams.lock().await;
        Ok(teams
            .get(team)
            .map(|t| t.entries.iter().map(|e| e.patient.clone()).collect())
            .unwrap_or_default())
    }

    async fn get(&self, team: &str, uid: &str) -> Result<Option<Patient>, StoreError> {
        let teams = self.teams.lock().await;
        Ok(teams
            .get(team)
            .and_then(|t| t.position(uid).map(|i| t.entries[i].patient.clone())))
    }

    async fn changes_since(
        &self,
        team: &str,
        since: Option<Watermark>,
    ) -> Result<ChangeFeed, StoreError> {
        let teams = self.teams.lock().await;
        let Some(records) = teams.get(team) else {
            return Ok(ChangeFeed {
                patients: Vec::new(),
                deleted: Vec::new(),
                watermark: Watermark::default(),
                full: true,
            });
        };

        let watermark = Watermark(records.revision);
        let since = since.filter(|s| *s <= watermark);

        let feed = match since {
            None => ChangeFeed {
                patients: records.entries.iter().map(|e| e.patient.clone()).collect(),
                deleted: Vec::new(),
                watermark,
                full: true,
            },
            Some(Watermark(since)) => {
                let mut deleted: Vec<(&String, u64)> = records
                    .tombstones
                    .iter()
                    .filter(|(_, rev)| **rev > since)
                    .map(|(uid, rev)| (uid, *rev))
                    .collect();
                deleted.sort_by_key(|(_, rev)| *rev);

                ChangeFeed {
                    patients: records
                        .entries
                        .iter()
                        .filter(|e| e.revision > since)
                        .map(|e| e.patient.clone())
                        .collect(),
                    deleted: deleted.into_iter().map(|(uid, _)| uid.clone()).collect(),
                    watermark,
                    full: false,
                }
            }
        };
        Ok(feed)
    }

    async fn apply(&self, team: &str, batch: &WriteBatch) -> Result<ApplyCounts, StoreError> {
        self.check_poisoned(batch)?;

        let mut teams = self.teams.lock().await;
        let records = teams.entry(team.to_string()).or_default();
        let mut counts = ApplyCounts::default();

        for uid in &batch.deletes {
            if let Some(i) = records.position(uid) {
                records.entries.remove(i);
                let revision = records.next_revision();
                records.tombstones.insert(uid.clone(), revision);
                counts.deleted += 1;
            }
        }

        for patient in &batch.upserts {
            match records.position(&patient.uid) {
                Some(i) => {
                    if batch.mode == WriteMode::InsertOnly || records.entries[i].patient == *patient
                    {
                        continue;
                    }
                    let revision = records.next_revision();
                    records.entries[i] = Entry {
                        patient: patient.clone(),
                        revision,
                    };
                    counts.added += 1;
                }
                None => {
                    let revision = records.next_revision();
                    records.tombstones.remove(&patient.uid);
                    records.entries.push(Entry {
                        patient: patient.clone(),
                        revision,
                    });
                    counts.added += 1;
                }
            }
        }

        tracing::debug!(
            "memory store {}: +{} -{} (revision {})",
            team,
            counts.added,
            counts.deleted,
            records.revision
        );
        Ok(counts)
    }
}
