mod event;
mod outcome;
mod patient;
mod regime;

pub use event::{Event, ScheduledEvent, TERMINAL_MARKER};
pub use outcome::Outcome;
pub use patient::{pick_color, Patient, PatientStatus, MAX_MISSED_DAYS, PALETTE};
pub use regime::Regime;
