//! JSON bodies exchanged between devices and a host.
//!
//! Field names match the host's HTTP routes; every response carries a
//! `success` flag so older clients can check it without looking at status
//! codes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::merge::{DeviceOutcome, Strategy};
use super::record::StagedRecord;
use super::staging::{DeviceInfo, Selection};
use crate::models::{Outcome, Patient, PatientStatus};
use crate::store::Watermark;

/// Team every device may use without approval.
pub const DEFAULT_TEAM: &str = "DEFAULT";

/// Header naming the calling device.
pub const DEVICE_HEADER: &str = "X-Device-ID";

/// Device name used when a host's dataset is merged locally.
pub const HOST_SYNC_DEVICE: &str = "HOST_SYNC";

fn default_team() -> String {
    DEFAULT_TEAM.to_string()
}

/// A team as carried in a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberStatus::Pending => write!(f, "PENDING"),
            MemberStatus::Approved => write!(f, "APPROVED"),
            MemberStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(MemberStatus::Pending),
            "APPROVED" => Ok(MemberStatus::Approved),
            "REJECTED" => Ok(MemberStatus::Rejected),
            _ => Err(format!("Invalid member status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberRole {
    #[default]
    Member,
    Admin,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Member => write!(f, "MEMBER"),
            MemberRole::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MEMBER" => Ok(MemberRole::Member),
            "ADMIN" => Ok(MemberRole::Admin),
            _ => Err(format!("Invalid member role: {}", s)),
        }
    }
}

/// A team membership as carried in a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub team_slug: String,
    #[serde(default)]
    pub user_name: String,
    pub device_id: String,
    #[serde(default)]
    pub status: MemberStatus,
    #[serde(default)]
    pub role: MemberRole,
}

/// Query of `GET /api/get_all_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub since: Option<Watermark>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse {
    pub success: bool,
    #[serde(flatten)]
    pub delta: super::delta::DeltaResponse,
}

/// Body of `POST /api/stage_incoming`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    #[serde(default)]
    pub data: Vec<Patient>,
    #[serde(default)]
    pub deleted: Vec<String>,
    pub device_name: String,
    #[serde(default = "default_team")]
    pub team: String,
    #[serde(default)]
    pub teams: Vec<TeamInfo>,
    #[serde(default)]
    pub members: Vec<MemberInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResponse {
    pub success: bool,
    pub batch_id: Uuid,
    pub count: usize,
}

/// Query of `GET /api/get_staged_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagedQuery {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedDataResponse {
    pub success: bool,
    pub data: Vec<StagedRecord>,
}

/// Body of `POST /api/commit_staged`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    #[serde(default = "default_team")]
    pub team: String,
    pub commits_by_device: BTreeMap<String, Selection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub success: bool,
    /// Records inserted or replaced.
    pub count: usize,
    pub deleted: usize,
    pub devices: BTreeMap<String, DeviceOutcome>,
}

/// Body of `POST /api/merge_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    #[serde(default = "default_team")]
    pub team: String,
    pub source_device: String,
    #[serde(default)]
    pub data: Vec<Patient>,
    #[serde(default)]
    pub deleted: Vec<String>,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResponse {
    pub success: bool,
    pub added: usize,
    pub deleted: usize,
}

/// Body of `POST /api/update_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEventRequest {
    #[serde(default = "default_team")]
    pub team: String,
    pub uid: String,
    pub id: u32,
    #[serde(default)]
    pub missed_days: u32,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub outcome: Outcome,
}

/// Patients per treatment status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientCounts {
    pub active: usize,
    pub cured: usize,
    pub closed: usize,
}

impl PatientCounts {
    pub fn tally<'a>(patients: impl IntoIterator<Item = &'a Patient>) -> Self {
        patients
            .into_iter()
            .fold(Self::default(), |mut counts, p| {
                match p.status() {
                    PatientStatus::Active => counts.active += 1,
                    PatientStatus::Cured => counts.cured += 1,
                    PatientStatus::Closed => counts.closed += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.active + self.cured + self.closed
    }
}

/// Response of `GET /api/get_host_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
    #[serde(default)]
    pub patients: PatientCounts,
}

/// Generic `{success, message}` body, used for errors and bare acknowledgements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiMessage {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}
