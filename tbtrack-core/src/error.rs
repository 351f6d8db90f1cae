//! Error types shared by the sync components.

use thiserror::Error;

use crate::models::Outcome;

/// Errors raised by a `RecordStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying storage failed (I/O, SQL, serialization).
    #[error("Store backend error: {0}")]
    Backend(String),
    /// A write lost a race with another writer and was rolled back.
    #[error("Write conflict: {0}")]
    Conflict(String),
}

/// Errors surfaced by diff, staging, merge and delta operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Access denied: device '{device}' is not approved for team '{team}'")]
    AccessDenied { team: String, device: String },

    #[error("Stale reference for device '{device}': {reason}")]
    StaleReference { device: String, reason: String },

    #[error("Host unreachable ({target}): {reason}")]
    NetworkUnavailable { target: String, reason: String },

    #[error("Host {target} rejected the request ({status}): {message}")]
    HostRejected {
        target: String,
        status: u16,
        message: String,
    },

    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Event {event_id} not found for patient {uid}")]
    EventNotFound { uid: String, event_id: u32 },

    #[error("Invalid outcome '{outcome}' for milestone '{title}'")]
    InvalidOutcome { title: String, outcome: Outcome },

    #[error("Missed days {missed_days} out of range for event {event_id}")]
    InvalidMissedDays { event_id: u32, missed_days: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}
