use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::Patient;

/// Classification of an incoming record against the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StagedStatus {
    New,
    Update,
    Delete,
    Same,
}

impl fmt::Display for StagedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagedStatus::New => write!(f, "NEW"),
            StagedStatus::Update => write!(f, "UPDATE"),
            StagedStatus::Delete => write!(f, "DELETE"),
            StagedStatus::Same => write!(f, "SAME"),
        }
    }
}

/// A deletion pushed by a device, with the local copy it would remove (if any).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known: Option<Patient>,
}

/// One classified change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "UPPERCASE")]
pub enum Change {
    New(Patient),
    Update(Patient),
    Same(Patient),
    Delete(Tombstone),
}

impl Change {
    pub fn status(&self) -> StagedStatus {
        match self {
            Change::New(_) => StagedStatus::New,
            Change::Update(_) => StagedStatus::Update,
            Change::Same(_) => StagedStatus::Same,
            Change::Delete(_) => StagedStatus::Delete,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Change::New(p) | Change::Update(p) | Change::Same(p) => &p.uid,
            Change::Delete(t) => &t.uid,
        }
    }

    /// Display name, when the record carries (or remembers) a patient.
    pub fn name(&self) -> Option<&str> {
        match self {
            Change::New(p) | Change::Update(p) | Change::Same(p) => Some(&p.name),
            Change::Delete(t) => t.last_known.as_ref().map(|p| p.name.as_str()),
        }
    }
}

/// A change held in a staging area, tagged with its provenance.
///
/// `idx` is the position in the source device's batch at staging time and
/// never changes while the batch lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub source_device: String,
    pub batch_id: Uuid,
    pub idx: usize,
    pub change: Change,
}

impl StagedRecord {
    pub fn status(&self) -> StagedStatus {
        self.change.status()
    }

    pub fn uid(&self) -> &str {
        self.change.uid()
    }
}

/// Per-status counts, used for review summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub new: usize,
    pub update: usize,
    pub delete: usize,
    pub same: usize,
}

impl Summary {
    pub fn of<'a>(changes: impl IntoIterator<Item = &'a Change>) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.status() {
                StagedStatus::New => summary.new += 1,
                StagedStatus::Update => summary.update += 1,
                StagedStatus::Delete => summary.delete += 1,
                StagedStatus::Same => summary.same += 1,
            }
        }
        summary
    }

    /// Records that need a decision (everything but SAME).
    pub fn actionable(&self) -> usize {
        self.new + self.update + self.delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Regime;

    #[test]
    fn test_change_json_is_tagged() {
        let change = Change::New(Patient::new("U Ti", Regime::Ir).with_uid("abc1"));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["status"], "NEW");
        assert_eq!(json["payload"]["uid"], "abc1");

        let delete = Change::Delete(Tombstone {
            uid: "xyz9".to_string(),
            last_known: None,
        });
        let json = serde_json::to_value(&delete).unwrap();
        assert_eq!(json["status"], "DELETE");
        assert_eq!(json["payload"]["uid"], "xyz9");
        assert!(json["payload"].get("last_known").is_none());
    }

    #[test]
    fn test_staged_record_json_roundtrip() {
        let record = StagedRecord {
            source_device: "phone".to_string(),
            batch_id: Uuid::new_v4(),
            idx: 3,
            change: Change::Update(Patient::new("Daw Hla", Regime::Rr)),
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: StagedRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.status(), StagedStatus::Update);
    }

    #[test]
    fn test_summary() {
        let changes = vec![
            Change::New(Patient::new("a", Regime::Ir)),
            Change::Same(Patient::new("b", Regime::Ir)),
            Change::Delete(Tombstone {
                uid: "c".to_string(),
                last_known: None,
            }),
        ];
        let summary = Summary::of(&changes);
        assert_eq!(summary.new, 1);
        assert_eq!(summary.same, 1);
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.actionable(), 2);
    }
}
