//! Diff classifier.
//!
//! Compares incoming records with a local set by uid. Comparison is
//! structural (every field, events included) because two devices never share
//! object identity for the same logical record.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::record::{Change, StagedRecord, Summary, Tombstone};
use crate::models::Patient;

/// Classifies a device's push against `local` into one fresh batch.
///
/// Records follow the incoming order, then the deletions in the order given;
/// `idx` is the position in that sequence.
pub fn classify(
    local: &[Patient],
    incoming: &[Patient],
    deleted: &[String],
    source_device: &str,
) -> Vec<StagedRecord> {
    let batch_id = Uuid::new_v4();
    classify_changes(local, incoming, deleted)
        .into_iter()
        .enumerate()
        .map(|(idx, change)| StagedRecord {
            source_device: source_device.to_string(),
            batch_id,
            idx,
            change,
        })
        .collect()
}

/// Counts per status, for review summaries.
pub fn summarize(records: &[StagedRecord]) -> Summary {
    Summary::of(records.iter().map(|r| &r.change))
}

/// Classifies `incoming` and the explicit `deleted` uids against `local`.
///
/// A uid repeated in `incoming` keeps the position of its first occurrence
/// and the content of its last; repeated deletions collapse to one.
pub fn classify_changes(
    local: &[Patient],
    incoming: &[Patient],
    deleted: &[String],
) -> Vec<Change> {
    let local: HashMap<&str, &Patient> = local.iter().map(|p| (p.uid.as_str(), p)).collect();

    let mut changes: Vec<Change> = Vec::with_capacity(incoming.len() + deleted.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for patient in incoming {
        let change = match local.get(patient.uid.as_str()) {
            None => Change::New(patient.clone()),
            Some(existing) if *existing == patient => Change::Same(patient.clone()),
            Some(_) => Change::Update(patient.clone()),
        };

        match positions.get(patient.uid.as_str()) {
            Some(&i) => changes[i] = change,
            None => {
                positions.insert(patient.uid.as_str(), changes.len());
                changes.push(change);
            }
        }
    }

    let mut seen_deletes: HashSet<&str> = HashSet::new();
    for uid in deleted {
        if !seen_deletes.insert(uid.as_str()) {
            continue;
        }
        changes.push(Change::Delete(Tombstone {
            uid: uid.clone(),
            last_known: local.get(uid.as_str()).map(|p| (*p).clone()),
        }));
    }

    tracing::debug!(
        "classified {} incoming and {} deleted against {} local records",
        incoming.len(),
        deleted.len(),
        local.len()
    );
    changes
}
