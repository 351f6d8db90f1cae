use chrono::{Duration, NaiveDate};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::event::{Event, ScheduledEvent};
use super::outcome::Outcome;
use super::regime::Regime;
use crate::error::SyncError;

/// Calendar colors handed out to newly enrolled patients.
pub const PALETTE: [&str; 10] = [
    "#FF5733", "#33FF57", "#3357FF", "#FF33A1", "#33FFF2", "#FFC733", "#8E44AD", "#F39C12",
    "#1ABC9C", "#2ECC71",
];

/// Upper bound on days missed at one milestone, ten years.
pub const MAX_MISSED_DAYS: u32 = 3650;

/// A patient under treatment, with the milestones of their regime.
///
/// `uid` is the join key for every diff and merge; it never changes once
/// assigned, whichever device created the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub sex: String,
    pub regime: Regime,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Treatment status derived from milestone outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientStatus {
    Active,
    Cured,
    Closed,
}

impl fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientStatus::Active => write!(f, "active"),
            PatientStatus::Cured => write!(f, "cured"),
            PatientStatus::Closed => write!(f, "closed"),
        }
    }
}

impl Patient {
    pub fn new(name: impl Into<String>, regime: Regime) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            name: name.into(),
            age: 0,
            sex: String::new(),
            regime,
            address: String::new(),
            remark: String::new(),
            events: Vec::new(),
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    pub fn with_sex(mut self, sex: impl Into<String>) -> Self {
        self.sex = sex.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    /// Creates the milestone events of this patient's regime, starting at `start`.
    ///
    /// Replaces any existing events. Each milestone gets the patient remark.
    pub fn enroll(mut self, start: NaiveDate, color: impl Into<String>) -> Self {
        let color = color.into();
        self.events = self
            .regime
            .milestones()
            .iter()
            .zip(1u32..)
            .map(|(&(label, offset), id)| {
                let date = start
                    .checked_add_signed(Duration::days(offset))
                    .unwrap_or(NaiveDate::MAX);
                Event::new(id, label, date)
                    .with_color(color.clone())
                    .with_remark(self.remark.clone())
            })
            .collect();
        self
    }

    pub fn event(&self, id: u32) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Milestones in planned-date order with the ripple of missed days applied.
    ///
    /// Days missed on a milestone push back every later milestone, not the
    /// milestone itself. Dates past the calendar range clamp to
    /// [`NaiveDate::MAX`].
    pub fn schedule(&self) -> Vec<ScheduledEvent<'_>> {
        let mut ordered: Vec<&Event> = self.events.iter().collect();
        ordered.sort_by_key(|e| e.start);

        let mut shift = 0i64;
        ordered
            .into_iter()
            .map(|event| {
                let scheduled = ScheduledEvent {
                    event,
                    date: Duration::try_days(shift)
                        .and_then(|d| event.start.checked_add_signed(d))
                        .unwrap_or(NaiveDate::MAX),
                    shift,
                };
                shift = shift.saturating_add(i64::from(event.missed_days));
                scheduled
            })
            .collect()
    }

    /// Applies an edit to one milestone.
    ///
    /// Fails without touching the patient if the event is unknown, the
    /// outcome is not allowed for that kind of milestone, or `missed_days`
    /// exceeds [`MAX_MISSED_DAYS`].
    pub fn update_event(
        &mut self,
        event_id: u32,
        missed_days: u32,
        remark: impl Into<String>,
        outcome: Outcome,
    ) -> Result<(), SyncError> {
        let uid = self.uid.clone();
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(SyncError::EventNotFound { uid, event_id })?;

        if !outcome.allowed_on(event.is_terminal()) {
            return Err(SyncError::InvalidOutcome {
                title: event.title.clone(),
                outcome,
            });
        }
        if missed_days > MAX_MISSED_DAYS {
            return Err(SyncError::InvalidMissedDays {
                event_id,
                missed_days,
            });
        }

        event.missed_days = missed_days;
        event.remark = remark.into().trim().to_string();
        event.outcome = outcome;
        Ok(())
    }

    pub fn status(&self) -> PatientStatus {
        for scheduled in self.schedule() {
            let event = scheduled.event;
            match event.outcome {
                Outcome::Pending => {}
                Outcome::Failed | Outcome::Ltfu | Outcome::Died => return PatientStatus::Closed,
                Outcome::Cured | Outcome::Completed if event.is_terminal() => {
                    return PatientStatus::Cured
                }
                Outcome::Cured | Outcome::Completed => {}
            }
        }
        PatientStatus::Active
    }

    /// SHA-256 of the canonical JSON encoding, hex-encoded.
    ///
    /// Two structurally identical patients always share a fingerprint.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let hash = Sha256::digest(&bytes);
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Picks the first palette color not already used by an event, or a random one.
pub fn pick_color<'a>(used: impl IntoIterator<Item = &'a str>) -> String {
    let used: Vec<&str> = used.into_iter().collect();
    PALETTE
        .iter()
        .find(|c| !used.contains(*c))
        .or_else(|| PALETTE.choose(&mut rand::rng()))
        .unwrap_or(&PALETTE[0])
        .to_string()
}

impl fmt::Display for Patient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.chars().count()))?;
        writeln!(f, "UID:     {}", self.uid)?;
        writeln!(f, "Age/Sex: {} / {}", self.age, self.sex)?;
        writeln!(f, "Regime:  {}", self.regime)?;
        if !self.address.is_empty() {
            writeln!(f, "Address: {}", self.address)?;
        }
        if !self.remark.is_empty() {
            writeln!(f, "Remark:  {}", self.remark)?;
        }
        writeln!(f, "Status:  {}", self.status())?;

        if !self.events.is_empty() {
            writeln!(f, "\nMilestones:")?;
            for scheduled in self.schedule() {
                let event = scheduled.event;
                write!(f, "  [{}] {} {}", event.id, scheduled.date, event.title)?;
                if scheduled.shift > 0 {
                    write!(f, " (+{}d)", scheduled.shift)?;
                }
                if event.outcome != Outcome::Pending {
                    write!(f, " - {}", event.outcome)?;
                }
                writeln!(f)?;
            }
        }

        Ok(())
    }
}
