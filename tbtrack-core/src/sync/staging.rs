//! Per-device staging of pushed changes awaiting review.
//!
//! Each device holds at most one batch per team. A new push replaces the
//! previous batch wholesale and receives a fresh `batch_id`. The device slot
//! itself (push counter, last origin) outlives its batches. Committing
//! consumes the selected records, and a batch with nothing left is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::record::{StagedRecord, StagedStatus, Summary};
use crate::error::SyncError;

/// One device's pending changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedBatch {
    pub batch_id: Uuid,
    pub staged_at: DateTime<Utc>,
    pub records: Vec<StagedRecord>,
}

impl StagedBatch {
    /// True while the batch still holds something that needs a decision.
    pub fn has_pending(&self) -> bool {
        self.records.iter().any(|r| r.status() != StagedStatus::Same)
    }

    pub fn summary(&self) -> Summary {
        Summary::of(self.records.iter().map(|r| &r.change))
    }
}

/// Everything the host remembers about a pushing device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSlot {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub pushes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<StagedBatch>,
}

/// Which devices to read staged records for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    All,
    Device(String),
}

impl FromStr for DeviceFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            Ok(DeviceFilter::All)
        } else {
            Ok(DeviceFilter::Device(s.to_string()))
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFilter::All => write!(f, "all"),
            DeviceFilter::Device(name) => write!(f, "{}", name),
        }
    }
}

/// A reviewer's pick from one device's batch.
///
/// The `batch_id` pins the selection to the batch the reviewer actually saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub batch_id: Uuid,
    pub indices: Vec<usize>,
}

/// Summary row for host-info and review listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    pub pushes: u32,
    pub has_pending: bool,
    #[serde(default)]
    pub staged_at: Option<DateTime<Utc>>,
}

/// All device slots of one team, keyed by device name.
#[derive(Debug, Clone, Default)]
pub struct StagingArea {
    slots: BTreeMap<String, DeviceSlot>,
}

impl StagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an area from persisted slots.
    pub fn from_slots(slots: impl IntoIterator<Item = DeviceSlot>) -> Self {
        Self {
            slots: slots.into_iter().map(|s| (s.device.clone(), s)).collect(),
        }
    }

    /// Replaces `device`'s batch with `records`.
    ///
    /// Records are restamped with `device`, a fresh batch id and their
    /// position in the new batch.
    pub fn stage(
        &mut self,
        device: &str,
        records: Vec<StagedRecord>,
        origin: Option<String>,
    ) -> &DeviceSlot {
        let batch_id = Uuid::new_v4();
        let records: Vec<StagedRecord> = records
            .into_iter()
            .enumerate()
            .map(|(idx, record)| StagedRecord {
                source_device: device.to_string(),
                batch_id,
                idx,
                change: record.change,
            })
            .collect();
        let count = records.len();

        let slot = self
            .slots
            .entry(device.to_string())
            .or_insert_with(|| DeviceSlot {
                device: device.to_string(),
                origin: None,
                pushes: 0,
                batch: None,
            });
        slot.pushes += 1;
        if origin.is_some() {
            slot.origin = origin;
        }
        slot.batch = Some(StagedBatch {
            batch_id,
            staged_at: Utc::now(),
            records,
        });

        tracing::info!(
            "staged {} records from {} (batch {}, push #{})",
            count,
            device,
            batch_id,
            slot.pushes
        );
        slot
    }

    pub fn slot(&self, device: &str) -> Option<&DeviceSlot> {
        self.slots.get(device)
    }

    pub fn batch(&self, device: &str) -> Option<&StagedBatch> {
        self.slots.get(device).and_then(|s| s.batch.as_ref())
    }

    pub fn slots(&self) -> impl Iterator<Item = &DeviceSlot> {
        self.slots.values()
    }

    /// Staged records, ordered by device name then index.
    pub fn get_staged(&self, filter: &DeviceFilter) -> Vec<StagedRecord> {
        match filter {
            DeviceFilter::All => self
                .slots
                .values()
                .filter_map(|s| s.batch.as_ref())
                .flat_map(|b| b.records.iter().cloned())
                .collect(),
            DeviceFilter::Device(name) => self
                .batch(name)
                .map(|b| b.records.clone())
                .unwrap_or_default(),
        }
    }

    /// Resolves a selection against the current batch of `device`.
    ///
    /// Fails with `StaleReference` if the batch was replaced or consumed
    /// since the reviewer loaded it, or if an index is no longer present.
    pub fn select(
        &self,
        device: &str,
        selection: &Selection,
    ) -> Result<Vec<&StagedRecord>, SyncError> {
        let stale = |reason: String| SyncError::StaleReference {
            device: device.to_string(),
            reason,
        };

        let batch = self
            .batch(device)
            .ok_or_else(|| stale("no staged batch".to_string()))?;

        if batch.batch_id != selection.batch_id {
            return Err(stale(format!(
                "batch {} was replaced by {}",
                selection.batch_id, batch.batch_id
            )));
        }

        let wanted: BTreeSet<usize> = selection.indices.iter().copied().collect();
        let picked: Vec<&StagedRecord> = batch
            .records
            .iter()
            .filter(|r| wanted.contains(&r.idx))
            .collect();

        if picked.len() != wanted.len() {
            let missing: Vec<String> = wanted
                .iter()
                .filter(|i| !picked.iter().any(|r| r.idx == **i))
                .map(|i| i.to_string())
                .collect();
            return Err(stale(format!("indices {} not staged", missing.join(", "))));
        }

        Ok(picked)
    }

    /// Removes committed indices; drops the batch once it is empty.
    ///
    /// Returns false if `batch_id` no longer names the device's batch.
    pub fn consume(&mut self, device: &str, batch_id: Uuid, indices: &[usize]) -> bool {
        let Some(slot) = self.slots.get_mut(device) else {
            return false;
        };
        let Some(batch) = slot.batch.as_mut().filter(|b| b.batch_id == batch_id) else {
            return false;
        };
        batch.records.retain(|r| !indices.contains(&r.idx));
        if batch.records.is_empty() {
            slot.batch = None;
        }
        true
    }

    /// One row per known device, for host-info polling.
    pub fn pending_devices(&self) -> Vec<DeviceInfo> {
        self.slots
            .values()
            .map(|s| DeviceInfo {
                name: s.device.clone(),
                ip: s.origin.clone(),
                pushes: s.pushes,
                has_pending: s.batch.as_ref().is_some_and(|b| b.has_pending()),
                staged_at: s.batch.as_ref().map(|b| b.staged_at),
            })
            .collect()
    }

    /// True when no device has a batch waiting.
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(|s| s.batch.is_none())
    }
}
