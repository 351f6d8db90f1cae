//! Merge engine: selective commit of staged records and whole-dataset merges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::record::Change;
use super::staging::{Selection, StagingArea};
use crate::error::SyncError;
use crate::models::Patient;
use crate::store::{ApplyCounts, RecordStore, WriteBatch, WriteMode};

/// What happened to one device's part of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeviceOutcome {
    Applied { added: usize, deleted: usize },
    Stale { reason: String },
    Failed { message: String },
}

/// Result of a selective commit across devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub added: usize,
    pub deleted: usize,
    pub devices: BTreeMap<String, DeviceOutcome>,
}

impl CommitReport {
    /// True when at least one device was named and every one of them was stale.
    pub fn all_stale(&self) -> bool {
        !self.devices.is_empty()
            && self
                .devices
                .values()
                .all(|o| matches!(o, DeviceOutcome::Stale { .. }))
    }
}

/// Commits the selected staged records of each device into `store`.
///
/// Devices are processed independently: a stale selection or a failed store
/// write affects only that device, whose batch is then left untouched.
pub async fn commit<S: RecordStore>(
    store: &S,
    staging: &mut StagingArea,
    team: &str,
    commits_by_device: &BTreeMap<String, Selection>,
) -> CommitReport {
    let mut report = CommitReport::default();

    for (device, selection) in commits_by_device {
        let (batch, indices) = match staging.select(device, selection) {
            Ok(records) => {
                let indices: Vec<usize> = records.iter().map(|r| r.idx).collect();
                let batch = write_batch(records.into_iter().map(|r| &r.change));
                (batch, indices)
            }
            Err(SyncError::StaleReference { reason, .. }) => {
                tracing::warn!("skipping stale commit from {}: {}", device, reason);
                report
                    .devices
                    .insert(device.clone(), DeviceOutcome::Stale { reason });
                continue;
            }
            Err(e) => {
                report.devices.insert(
                    device.clone(),
                    DeviceOutcome::Failed {
                        message: e.to_string(),
                    },
                );
                continue;
            }
        };

        let counts = if batch.is_empty() {
            ApplyCounts::default()
        } else {
            match store.apply(team, &batch).await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::error!("commit from {} into {} failed: {}", device, team, e);
                    report.devices.insert(
                        device.clone(),
                        DeviceOutcome::Failed {
                            message: e.to_string(),
                        },
                    );
                    continue;
                }
            }
        };

        staging.consume(device, selection.batch_id, &indices);
        report.added += counts.added;
        report.deleted += counts.deleted;
        report.devices.insert(
            device.clone(),
            DeviceOutcome::Applied {
                added: counts.added,
                deleted: counts.deleted,
            },
        );
        tracing::info!(
            "committed {} records from {} into {} (+{} -{})",
            indices.len(),
            device,
            team,
            counts.added,
            counts.deleted
        );
    }

    report
}

fn write_batch<'a>(changes: impl IntoIterator<Item = &'a Change>) -> WriteBatch {
    let mut batch = WriteBatch::new(WriteMode::Overwrite);
    for change in changes {
        match change {
            Change::Delete(t) => batch.deletes.push(t.uid.clone()),
            Change::New(p) | Change::Update(p) => batch.upserts.push(p.clone()),
            Change::Same(_) => {}
        }
    }
    batch
}

/// Whole-dataset merge strategy, chosen by the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    /// Insert unknown uids only; deletes are ignored.
    Append,
    /// Apply deletes, then insert or overwrite by uid.
    Replace,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Append => write!(f, "APPEND"),
            Strategy::Replace => write!(f, "REPLACE"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "APPEND" => Ok(Strategy::Append),
            "REPLACE" => Ok(Strategy::Replace),
            _ => Err(format!(
                "Invalid strategy: {}. Valid options: append, replace",
                s
            )),
        }
    }
}

/// Merges a whole dataset into `store` in one atomic write.
pub async fn merge<S: RecordStore>(
    store: &S,
    team: &str,
    data: Vec<Patient>,
    deleted: Vec<String>,
    strategy: Strategy,
) -> Result<ApplyCounts, SyncError> {
    let batch = match strategy {
        Strategy::Append => WriteBatch {
            deletes: Vec::new(),
            upserts: data,
            mode: WriteMode::InsertOnly,
        },
        Strategy::Replace => WriteBatch {
            deletes: deleted,
            upserts: data,
            mode: WriteMode::Overwrite,
        },
    };

    let counts = store.apply(team, &batch).await?;
    tracing::info!(
        "{} merge into {}: +{} -{}",
        strategy,
        team,
        counts.added,
        counts.deleted
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, Regime};
    use crate::store::MemoryStore;
    use crate::sync::diff::classify;
    use crate::sync::staging::DeviceFilter;
    use chrono::NaiveDate;

    const TEAM: &str = "DEFAULT";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn patient(uid: &str) -> Patient {
        Patient::new(format!("Patient {}", uid), Regime::Cr)
            .with_uid(uid)
            .enroll(date(2024, 2, 1), "#3357FF")
    }

    async fn push(
        store: &MemoryStore,
        staging: &mut StagingArea,
        device: &str,
        data: &[Patient],
        deleted: &[String],
    ) -> Selection {
        let local = store.list(TEAM).await.unwrap();
        let records = classify(&local, data, deleted, device);
        let batch = staging.stage(device, records, None).batch.clone().unwrap();
        Selection {
            batch_id: batch.batch_id,
            indices: batch.records.iter().map(|r| r.idx).collect(),
        }
    }

    fn single(device: &str, selection: Selection) -> BTreeMap<String, Selection> {
        BTreeMap::from([(device.to_string(), selection)])
    }

    fn uids(patients: &[Patient]) -> Vec<String> {
        let mut uids: Vec<String> = patients.iter().map(|p| p.uid.clone()).collect();
        uids.sort();
        uids
    }

    #[tokio::test]
    async fn test_commit_disjoint_gives_union() {
        let store = MemoryStore::with_patients(TEAM, vec![patient("a"), patient("b")])
            .await
            .unwrap();
        let mut staging = StagingArea::new();
        let data = [patient("c"), patient("d")];
        let selection = push(&store, &mut staging, "phone", &data, &[]).await;

        let report = commit(&store, &mut staging, TEAM, &single("phone", selection)).await;
        assert_eq!(report.added, 2);
        assert_eq!(uids(&store.list(TEAM).await.unwrap()), vec!["a", "b", "c", "d"]);
        assert!(staging.is_empty());
    }

    #[tokio::test]
    async fn test_commit_remark_update() {
        let store = MemoryStore::with_patients(TEAM, vec![patient("a")]).await.unwrap();
        let mut changed = patient("a");
        changed.events[1].remark = "sputum negative".to_string();

        let mut staging = StagingArea::new();
        let selection = push(&store, &mut staging, "phone", &[changed], &[]).await;
        commit(&store, &mut staging, TEAM, &single("phone", selection)).await;

        let stored = store.get(TEAM, "a").await.unwrap().unwrap();
        assert_eq!(stored.events[1].remark, "sputum negative");
    }

    #[tokio::test]
    async fn test_commit_twice_is_noop() {
        let store = MemoryStore::new();
        let mut staging = StagingArea::new();
        let selection = push(&store, &mut staging, "phone", &[patient("a")], &[]).await;
        let request = single("phone", selection);

        let first = commit(&store, &mut staging, TEAM, &request).await;
        assert_eq!(first.added, 1);

        let second = commit(&store, &mut staging, TEAM, &request).await;
        assert_eq!((second.added, second.deleted), (0, 0));
        assert!(second.all_stale());
        assert_eq!(store.list(TEAM).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replaced_batch_is_stale() {
        let store = MemoryStore::new();
        let mut staging = StagingArea::new();
        let old = push(&store, &mut staging, "phone", &[patient("a")], &[]).await;
        push(&store, &mut staging, "phone", &[patient("b")], &[]).await;

        let report = commit(&store, &mut staging, TEAM, &single("phone", old)).await;
        assert!(matches!(
            report.devices.get("phone"),
            Some(DeviceOutcome::Stale { .. })
        ));
        assert!(store.list(TEAM).await.unwrap().is_empty());
        assert_eq!(staging.get_staged(&DeviceFilter::All).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_device_does_not_block_others() {
        let store = MemoryStore::new();
        let mut staging = StagingArea::new();
        let old = push(&store, &mut staging, "phone", &[patient("a")], &[]).await;
        push(&store, &mut staging, "phone", &[patient("b")], &[]).await;
        let tablet = push(&store, &mut staging, "tablet", &[patient("c")], &[]).await;

        let request = BTreeMap::from([
            ("phone".to_string(), old),
            ("tablet".to_string(), tablet),
        ]);
        let report = commit(&store, &mut staging, TEAM, &request).await;

        assert_eq!(report.added, 1);
        assert!(!report.all_stale());
        assert_eq!(uids(&store.list(TEAM).await.unwrap()), vec!["c"]);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_batch() {
        let store = MemoryStore::new();
        store.poison("bad");
        let mut staging = StagingArea::new();
        let phone = push(&store, &mut staging, "phone", &[patient("bad")], &[]).await;
        let tablet = push(&store, &mut staging, "tablet", &[patient("good")], &[]).await;

        let request = BTreeMap::from([
            ("phone".to_string(), phone),
            ("tablet".to_string(), tablet),
        ]);
        let report = commit(&store, &mut staging, TEAM, &request).await;

        assert!(matches!(
            report.devices.get("phone"),
            Some(DeviceOutcome::Failed { .. })
        ));
        assert_eq!(report.added, 1);
        assert_eq!(staging.batch("phone").unwrap().records.len(), 1);
        assert!(staging.batch("tablet").is_none());
    }

    #[tokio::test]
    async fn test_partial_selection_leaves_rest() {
        let store = MemoryStore::new();
        let mut staging = StagingArea::new();
        let data = [patient("a"), patient("b")];
        let mut selection = push(&store, &mut staging, "phone", &data, &[]).await;
        selection.indices = vec![1];

        commit(&store, &mut staging, TEAM, &single("phone", selection)).await;
        assert_eq!(uids(&store.list(TEAM).await.unwrap()), vec!["b"]);

        let left = staging.get_staged(&DeviceFilter::Device("phone".to_string()));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].idx, 0);
    }

    #[tokio::test]
    async fn test_added_event_commits_as_update() {
        let base = Patient::new("Ko Aung", Regime::Ir)
            .with_uid("abc1")
            .with_events(vec![Event::new(1, "Start", date(2024, 1, 1))]);
        let store = MemoryStore::with_patients(TEAM, vec![base.clone()]).await.unwrap();

        let mut incoming = base;
        incoming.events.push(Event::new(2, "M2", date(2024, 2, 26)));

        let mut staging = StagingArea::new();
        let selection = push(&store, &mut staging, "phone", &[incoming], &[]).await;
        let staged = staging.get_staged(&DeviceFilter::All);
        assert_eq!(staged[0].status(), crate::sync::StagedStatus::Update);

        commit(&store, &mut staging, TEAM, &single("phone", selection)).await;
        let stored = store.get(TEAM, "abc1").await.unwrap().unwrap();
        assert_eq!(stored.events.len(), 2);
    }

    #[tokio::test]
    async fn test_commit_delete_and_same() {
        let store = MemoryStore::with_patients(TEAM, vec![patient("a"), patient("b")])
            .await
            .unwrap();
        let mut staging = StagingArea::new();
        let deleted = ["b".to_string()];
        let selection = push(&store, &mut staging, "phone", &[patient("a")], &deleted).await;

        let report = commit(&store, &mut staging, TEAM, &single("phone", selection)).await;
        assert_eq!((report.added, report.deleted), (0, 1));
        assert_eq!(uids(&store.list(TEAM).await.unwrap()), vec!["a"]);
    }

    #[tokio::test]
    async fn test_replace_merge_deletes() {
        let store = MemoryStore::with_patients(TEAM, vec![patient("xyz9"), patient("a")])
            .await
            .unwrap();
        let mut changed = patient("a");
        changed.name = "Changed".to_string();

        let deleted = vec!["xyz9".to_string()];
        let counts = merge(&store, TEAM, vec![changed], deleted, Strategy::Replace)
            .await
            .unwrap();
        assert_eq!((counts.added, counts.deleted), (1, 1));
        assert!(store.get(TEAM, "xyz9").await.unwrap().is_none());
        assert_eq!(store.get(TEAM, "a").await.unwrap().unwrap().name, "Changed");
    }

    #[tokio::test]
    async fn test_append_merge_never_overwrites() {
        let store = MemoryStore::with_patients(TEAM, vec![patient("a")]).await.unwrap();
        let mut changed = patient("a");
        changed.name = "Changed".to_string();

        let counts = merge(
            &store,
            TEAM,
            vec![changed, patient("b")],
            vec!["a".to_string()],
            Strategy::Append,
        )
        .await
        .unwrap();

        assert_eq!((counts.added, counts.deleted), (1, 0));
        assert_eq!(store.get(TEAM, "a").await.unwrap().unwrap().name, "Patient a");
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("append".parse::<Strategy>().unwrap(), Strategy::Append);
        assert_eq!(" REPLACE ".parse::<Strategy>().unwrap(), Strategy::Replace);
        assert!("merge".parse::<Strategy>().is_err());
        assert_eq!(
            serde_json::to_string(&Strategy::Replace).unwrap(),
            "\"REPLACE\""
        );
    }
}
