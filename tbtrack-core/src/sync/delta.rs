//! Delta sync: incremental pulls keyed by a per-team watermark.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::SyncError;
use crate::models::Patient;
use crate::store::{ApplyCounts, RecordStore, Watermark, WriteBatch, WriteMode};

/// Response to a pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaResponse {
    pub data: Vec<Patient>,
    #[serde(default)]
    pub deleted: Vec<String>,
    /// Watermark to send as `since` on the next pull.
    pub timestamp: Watermark,
    /// True when `data` is the whole team rather than a delta.
    #[serde(default)]
    pub full: bool,
}

impl DeltaResponse {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.deleted.is_empty()
    }

    /// Reconciles a client cache with this response.
    ///
    /// A full response replaces the cache. Otherwise tombstoned uids are
    /// removed first, then each returned patient replaces its cached copy or
    /// is appended.
    pub fn apply(&self, cache: &mut Vec<Patient>) {
        if self.full {
            *cache = self.data.clone();
            return;
        }

        let deleted: HashSet<&str> = self.deleted.iter().map(String::as_str).collect();
        cache.retain(|p| !deleted.contains(p.uid.as_str()));

        for patient in &self.data {
            match cache.iter_mut().find(|p| p.uid == patient.uid) {
                Some(existing) => *existing = patient.clone(),
                None => cache.push(patient.clone()),
            }
        }
    }

    /// Reconciles a local store with this response in one write.
    ///
    /// Unlike [`apply`](Self::apply), a full response never removes local
    /// records: a patient enrolled here and not yet pushed is absent from the
    /// host. Only uids the host tombstoned are deleted.
    pub async fn apply_to_store<S: RecordStore>(
        &self,
        store: &S,
        team: &str,
    ) -> Result<ApplyCounts, SyncError> {
        let mut batch = WriteBatch::new(WriteMode::Overwrite);
        batch.deletes = self.deleted.clone();
        batch.upserts = self.data.clone();

        if batch.is_empty() {
            return Ok(ApplyCounts::default());
        }
        Ok(store.apply(team, &batch).await?)
    }
}

/// Reads everything in `team` changed after `since`.
pub async fn pull<S: RecordStore>(
    store: &S,
    team: &str,
    since: Option<Watermark>,
) -> Result<DeltaResponse, SyncError> {
    let feed = store.changes_since(team, since).await?;
    tracing::debug!(
        "pull {} since {:?}: {} changed, {} deleted, watermark {}",
        team,
        since,
        feed.patients.len(),
        feed.deleted.len(),
        feed.watermark
    );

    Ok(DeltaResponse {
        data: feed.patients,
        deleted: feed.deleted,
        timestamp: feed.watermark,
        full: feed.full,
    })
}
