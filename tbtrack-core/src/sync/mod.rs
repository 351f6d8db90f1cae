//! Staging-and-merge synchronization between devices and a host.
//!
//! ## Flow
//!
//! 1. A device pushes its full dataset; the host classifies it against its
//!    own store (`diff`) and replaces that device's staged batch (`staging`).
//! 2. A reviewer picks records per device, pinned by `batch_id`, and commits
//!    them (`merge::commit`). Stale picks are skipped per device.
//! 3. Devices pull changes past their watermark (`delta`), driven by a
//!    `SyncSession` over a `HostLink`.

mod delta;
mod diff;
mod merge;
mod protocol;
mod record;
mod session;
mod staging;

pub use delta::{pull, DeltaResponse};
pub use diff::{classify, classify_changes, summarize};
pub use merge::{commit, merge, CommitReport, DeviceOutcome, Strategy};
pub use protocol::{
    ApiMessage, CommitRequest, CommitResponse, DataQuery, DataResponse, HostInfo, MemberInfo,
    MemberRole, MemberStatus, MergeRequest, MergeResponse, PatientCounts, StageRequest,
    StageResponse, StagedDataResponse, StagedQuery, TeamInfo, UpdateEventRequest, DEFAULT_TEAM,
    DEVICE_HEADER, HOST_SYNC_DEVICE,
};
pub use record::{Change, StagedRecord, StagedStatus, Summary, Tombstone};
pub use session::{HostLink, PullReport, SyncSession};
pub use staging::{DeviceFilter, DeviceInfo, DeviceSlot, Selection, StagedBatch, StagingArea};
