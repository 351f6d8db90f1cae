//! Client side of a sync conversation with one host.

use serde::{Deserialize, Serialize};
use std::future::Future;

use super::delta::DeltaResponse;
use super::merge::{merge, Strategy};
use super::protocol::{MemberInfo, StageRequest, StageResponse, TeamInfo};
use crate::error::SyncError;
use crate::store::{ApplyCounts, RecordStore, Watermark};

/// Transport to a host. Implemented over HTTP by the application.
pub trait HostLink: Send + Sync {
    /// Base URL or address of the host, for messages.
    fn target(&self) -> &str;

    fn fetch(
        &self,
        team: &str,
        device: &str,
        since: Option<Watermark>,
    ) -> impl Future<Output = Result<DeltaResponse, SyncError>> + Send;

    fn stage(
        &self,
        request: &StageRequest,
    ) -> impl Future<Output = Result<StageResponse, SyncError>> + Send;
}

/// Result of a pull into the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullReport {
    pub counts: ApplyCounts,
    pub full: bool,
    pub watermark: Watermark,
}

/// Who this device is, which team it syncs, and how far it got.
///
/// Methods take `&mut self`, so one session never runs two transfers at
/// once. The value is persisted between runs by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub device: String,
    pub team: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub watermark: Option<Watermark>,
}

impl SyncSession {
    pub fn new(device: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            team: team.into(),
            host: None,
            watermark: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Points the session at `host`; a different host invalidates the watermark.
    pub fn retarget(&mut self, host: &str) {
        if self.host.as_deref() != Some(host) {
            self.host = Some(host.to_string());
            self.watermark = None;
        }
    }

    /// Pulls changes from the host into `store`.
    ///
    /// An empty local store always asks for a full sync. Any failure drops
    /// the watermark so the next attempt starts over.
    pub async fn pull<L, S>(&mut self, link: &L, store: &S) -> Result<PullReport, SyncError>
    where
        L: HostLink,
        S: RecordStore,
    {
        let result = self.try_pull(link, store).await;
        match &result {
            Ok(report) => self.watermark = Some(report.watermark),
            Err(e) => {
                tracing::warn!("pull from {} failed: {}", link.target(), e);
                self.watermark = None;
            }
        }
        result
    }

    async fn try_pull<L, S>(&self, link: &L, store: &S) -> Result<PullReport, SyncError>
    where
        L: HostLink,
        S: RecordStore,
    {
        let has_local = !store.list(&self.team).await?.is_empty();
        let since = self.watermark.filter(|_| has_local);

        let response = link.fetch(&self.team, &self.device, since).await?;
        let counts = response.apply_to_store(store, &self.team).await?;
        tracing::info!(
            "pulled {} ({}) from {}: +{} -{}, watermark {}",
            self.team,
            if response.full { "full" } else { "delta" },
            link.target(),
            counts.added,
            counts.deleted,
            response.timestamp
        );

        Ok(PullReport {
            counts,
            full: response.full,
            watermark: response.timestamp,
        })
    }

    /// Sends the whole local dataset to the host for review.
    ///
    /// `deleted` carries every uid this device has tombstoned.
    pub async fn push<L, S>(
        &mut self,
        link: &L,
        store: &S,
        teams: Vec<TeamInfo>,
        members: Vec<MemberInfo>,
    ) -> Result<StageResponse, SyncError>
    where
        L: HostLink,
        S: RecordStore,
    {
        let feed = store.changes_since(&self.team, Some(Watermark(0))).await?;
        let request = StageRequest {
            data: store.list(&self.team).await?,
            deleted: feed.deleted,
            device_name: self.device.clone(),
            team: self.team.clone(),
            teams,
            members,
        };

        let response = link.stage(&request).await?;
        tracing::info!(
            "pushed {} records and {} deletions to {} (batch {})",
            request.data.len(),
            request.deleted.len(),
            link.target(),
            response.batch_id
        );
        Ok(response)
    }

    /// Merges the host's whole dataset into `store` with `strategy`.
    ///
    /// Unlike [`pull`](Self::pull) this never deletes local-only records
    /// unless the host tombstoned them, and it leaves the watermark alone.
    pub async fn fetch<L, S>(
        &mut self,
        link: &L,
        store: &S,
        strategy: Strategy,
    ) -> Result<ApplyCounts, SyncError>
    where
        L: HostLink,
        S: RecordStore,
    {
        // Revisions start at 1, so this returns every live record and every
        // tombstone in one round trip.
        let host = link
            .fetch(&self.team, &self.device, Some(Watermark(0)))
            .await?;
        merge(store, &self.team, host.data, host.deleted, strategy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Patient, Regime};
    use crate::store::{MemoryStore, WriteBatch};
    use crate::sync::delta::pull;
    use crate::sync::diff::classify;
    use crate::sync::record::StagedStatus;
    use crate::sync::staging::StagingArea;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    const TEAM: &str = "DEFAULT";

    /// Host backed by a memory store, optionally failing every call.
    struct LocalHost {
        store: MemoryStore,
        staging: Mutex<StagingArea>,
        down: AtomicBool,
    }

    impl LocalHost {
        async fn with(patients: Vec<Patient>) -> Self {
            Self {
                store: MemoryStore::with_patients(TEAM, patients).await.unwrap(),
                staging: Mutex::new(StagingArea::new()),
                down: AtomicBool::new(false),
            }
        }

        fn check(&self) -> Result<(), SyncError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SyncError::NetworkUnavailable {
                    target: "local".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    impl HostLink for LocalHost {
        fn target(&self) -> &str {
            "local"
        }

        async fn fetch(
            &self,
            team: &str,
            _device: &str,
            since: Option<Watermark>,
        ) -> Result<DeltaResponse, SyncError> {
            self.check()?;
            pull(&self.store, team, since).await
        }

        async fn stage(&self, request: &StageRequest) -> Result<StageResponse, SyncError> {
            self.check()?;
            let local = self.store.list(&request.team).await?;
            let device = &request.device_name;
            let records = classify(&local, &request.data, &request.deleted, device);
            let mut staging = self.staging.lock().await;
            let slot = staging.stage(&request.device_name, records, None);
            let batch = slot.batch.as_ref();
            Ok(StageResponse {
                success: true,
                batch_id: batch.map_or(Uuid::nil(), |b| b.batch_id),
                count: batch.map_or(0, |b| b.records.len()),
            })
        }
    }

    fn patient(uid: &str, name: &str) -> Patient {
        Patient::new(name, Regime::Ir).with_uid(uid)
    }

    #[tokio::test]
    async fn test_pull_full_then_delta() {
        let host = LocalHost::with(vec![patient("a", "A")]).await;
        let local = MemoryStore::new();
        let mut session = SyncSession::new("phone", TEAM);

        let first = session.pull(&host, &local).await.unwrap();
        assert!(first.full);
        assert_eq!(session.watermark, Some(first.watermark));

        host.store
            .apply(TEAM, &WriteBatch::upsert(patient("b", "B")))
            .await
            .unwrap();
        let second = session.pull(&host, &local).await.unwrap();
        assert!(!second.full);
        assert_eq!(second.counts.added, 1);
        assert_eq!(local.list(TEAM).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_first_pull_keeps_unpushed_patients() {
        let host = LocalHost::with(vec![patient("a", "A")]).await;
        let local = MemoryStore::with_patients(TEAM, vec![patient("mine", "Mine")])
            .await
            .unwrap();
        let mut session = SyncSession::new("phone", TEAM);

        let report = session.pull(&host, &local).await.unwrap();
        assert!(report.full);
        assert_eq!(report.counts.deleted, 0);
        assert!(local.get(TEAM, "mine").await.unwrap().is_some());

        let response = session.push(&host, &local, Vec::new(), Vec::new()).await.unwrap();
        assert_eq!(response.count, 2);
        let staging = host.staging.lock().await;
        let batch = staging.batch("phone").unwrap();
        assert!(batch.records.iter().all(|r| r.status() != StagedStatus::Delete));
    }

    #[tokio::test]
    async fn test_failed_pull_drops_watermark() {
        let host = LocalHost::with(vec![patient("a", "A")]).await;
        let local = MemoryStore::new();
        let mut session = SyncSession::new("phone", TEAM);
        session.pull(&host, &local).await.unwrap();
        assert!(session.watermark.is_some());

        host.down.store(true, Ordering::SeqCst);
        let err = session.pull(&host, &local).await.unwrap_err();
        assert!(matches!(err, SyncError::NetworkUnavailable { .. }));
        assert!(session.watermark.is_none());

        host.down.store(false, Ordering::SeqCst);
        let retry = session.pull(&host, &local).await.unwrap();
        assert!(retry.full);
    }

    #[tokio::test]
    async fn test_empty_store_forces_full_pull() {
        let host = LocalHost::with(vec![patient("a", "A")]).await;
        let local = MemoryStore::new();
        let mut session = SyncSession::new("phone", TEAM);
        session.watermark = Some(Watermark(1));

        let report = session.pull(&host, &local).await.unwrap();
        assert!(report.full);
        assert_eq!(local.list(TEAM).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_stages_local_data_and_deletions() {
        let host = LocalHost::with(vec![patient("a", "A"), patient("gone", "G")]).await;
        let seeded = vec![patient("a", "A"), patient("gone", "G")];
        let local = MemoryStore::with_patients(TEAM, seeded).await.unwrap();
        local.apply(TEAM, &WriteBatch::delete("gone")).await.unwrap();
        local
            .apply(TEAM, &WriteBatch::upsert(patient("n", "New")))
            .await
            .unwrap();

        let mut session = SyncSession::new("phone", TEAM);
        let response = session.push(&host, &local, Vec::new(), Vec::new()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.count, 3);

        let staging = host.staging.lock().await;
        let summary = staging.batch("phone").unwrap().summary();
        assert_eq!((summary.same, summary.new, summary.delete), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_fetch_append_keeps_local_edits() {
        let host = LocalHost::with(vec![patient("a", "Host A"), patient("b", "B")]).await;
        let local = MemoryStore::with_patients(TEAM, vec![patient("a", "Local A")])
            .await
            .unwrap();
        let mut session = SyncSession::new("phone", TEAM);

        let counts = session.fetch(&host, &local, Strategy::Append).await.unwrap();
        assert_eq!(counts.added, 1);
        assert_eq!(local.get(TEAM, "a").await.unwrap().unwrap().name, "Local A");
    }

    #[tokio::test]
    async fn test_fetch_replace_applies_host_deletes() {
        let host = LocalHost::with(vec![patient("a", "Host A"), patient("xyz9", "X")]).await;
        host.store.apply(TEAM, &WriteBatch::delete("xyz9")).await.unwrap();
        let seeded = vec![patient("a", "Local A"), patient("xyz9", "X")];
        let local = MemoryStore::with_patients(TEAM, seeded).await.unwrap();
        let mut session = SyncSession::new("phone", TEAM);

        session.fetch(&host, &local, Strategy::Replace).await.unwrap();
        assert!(local.get(TEAM, "xyz9").await.unwrap().is_none());
        assert_eq!(local.get(TEAM, "a").await.unwrap().unwrap().name, "Host A");
    }

    #[test]
    fn test_retarget_resets_watermark() {
        let mut session = SyncSession::new("phone", TEAM).with_host("http://10.0.0.5:5000");
        session.watermark = Some(Watermark(9));

        session.retarget("http://10.0.0.5:5000");
        assert_eq!(session.watermark, Some(Watermark(9)));

        session.retarget("http://10.0.0.6:5000");
        assert!(session.watermark.is_none());
    }
}
