//! tbtrack core library
//!
//! Patient and milestone models, the record store abstraction, and the
//! staging-and-merge sync engine shared by the CLI and the host server.

pub mod error;
pub mod models;
pub mod store;
pub mod sync;

pub use error::{StoreError, SyncError};
pub use models::{
    pick_color, Event, Outcome, Patient, PatientStatus, Regime, ScheduledEvent, MAX_MISSED_DAYS,
    PALETTE, TERMINAL_MARKER,
};
pub use store::{ApplyCounts, ChangeFeed, MemoryStore, RecordStore, Watermark, WriteBatch, WriteMode};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
