//! Record store abstraction.
//!
//! A store holds the patients of many teams, each team with its own revision
//! counter. Every mutation stamps the written patient (or the tombstone of a
//! deleted one) with the next revision of that team; the revision is what
//! delta sync watermarks refer to.
//!
//! Writes go through [`RecordStore::apply`], which must be atomic: either the
//! whole [`WriteBatch`] lands or none of it does.

mod memory;

pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use crate::error::StoreError;
use crate::models::Patient;

/// A point on a team's write timeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Watermark(pub u64);

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How upserts treat a uid that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the stored patient when the content differs.
    Overwrite,
    /// Leave existing patients untouched; only new uids are inserted.
    InsertOnly,
}

/// A set of mutations applied atomically. Deletes run before upserts.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub deletes: Vec<String>,
    pub upserts: Vec<Patient>,
    pub mode: WriteMode,
}

impl WriteBatch {
    pub fn new(mode: WriteMode) -> Self {
        Self {
            deletes: Vec::new(),
            upserts: Vec::new(),
            mode,
        }
    }

    pub fn upsert(patient: Patient) -> Self {
        Self {
            deletes: Vec::new(),
            upserts: vec![patient],
            mode: WriteMode::Overwrite,
        }
    }

    pub fn delete(uid: impl Into<String>) -> Self {
        Self {
            deletes: vec![uid.into()],
            upserts: Vec::new(),
            mode: WriteMode::Overwrite,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.upserts.is_empty()
    }
}

/// Number of records a write actually changed.
///
/// `added` counts inserts and content-changing replacements; identical
/// rewrites and skipped inserts are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyCounts {
    pub added: usize,
    pub deleted: usize,
}

impl ApplyCounts {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.deleted == 0
    }
}

impl std::ops::AddAssign for ApplyCounts {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.deleted += other.deleted;
    }
}

/// Patients and tombstones changed after a watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFeed {
    pub patients: Vec<Patient>,
    pub deleted: Vec<String>,
    /// Revision observed before the rows were gathered.
    pub watermark: Watermark,
    /// True when every patient of the team is included.
    pub full: bool,
}

/// Durable home of a team's patients.
pub trait RecordStore: Send + Sync {
    /// All patients of a team, in insertion order.
    fn list(&self, team: &str) -> impl Future<Output = Result<Vec<Patient>, StoreError>> + Send;

    fn get(
        &self,
        team: &str,
        uid: &str,
    ) -> impl Future<Output = Result<Option<Patient>, StoreError>> + Send;

    /// Changes with a revision strictly greater than `since`.
    ///
    /// `None` (or a watermark ahead of the team's revision, e.g. after the
    /// store was rebuilt) yields a full feed.
    fn changes_since(
        &self,
        team: &str,
        since: Option<Watermark>,
    ) -> impl Future<Output = Result<ChangeFeed, StoreError>> + Send;

    /// Applies a batch atomically and reports what changed.
    fn apply(
        &self,
        team: &str,
        batch: &WriteBatch,
    ) -> impl Future<Output = Result<ApplyCounts, StoreError>> + Send;
}
