use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::outcome::Outcome;

/// Marker in a milestone title identifying the terminal milestone.
pub const TERMINAL_MARKER: &str = "M-end";

/// A treatment milestone on a patient's calendar.
///
/// `start` is the planned date. Missed days recorded on earlier milestones are
/// applied on read (see `Patient::schedule`), never written back here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: u32,
    pub title: String,
    pub start: NaiveDate,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub missed_days: u32,
}

impl Event {
    pub fn new(id: u32, title: impl Into<String>, start: NaiveDate) -> Self {
        Self {
            id,
            title: title.into(),
            start,
            color: String::new(),
            outcome: Outcome::Pending,
            remark: String::new(),
            missed_days: 0,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn with_missed_days(mut self, missed_days: u32) -> Self {
        self.missed_days = missed_days;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.title.contains(TERMINAL_MARKER)
    }
}

/// An event together with its date after the ripple of earlier missed days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent<'a> {
    pub event: &'a Event,
    pub date: NaiveDate,
    /// Days this milestone was pushed back by earlier misses.
    pub shift: i64,
}
