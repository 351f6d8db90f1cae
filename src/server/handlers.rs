use axum::{
    extract::{ConnectInfo, Query, State},
    http::Extensions,
    Extension, Json,
};
use serde::Serialize;
use std::net::SocketAddr;

use tbtrack_core::store::{RecordStore, WriteBatch};
use tbtrack_core::sync::{
    classify, commit, merge, pull, ApiMessage, CommitRequest, CommitResponse, DataQuery,
    DataResponse, DeviceFilter, HostInfo, MergeRequest, MergeResponse, PatientCounts,
    StageRequest, StageResponse, StagedDataResponse, StagedQuery, UpdateEventRequest,
    DEFAULT_TEAM,
};
use tbtrack_core::SyncError;

use super::error::ApiError;
use super::{AppState, DeviceId};

fn team_or_default(team: Option<String>) -> String {
    team.filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TEAM.to_string())
}

async fn authorize(state: &AppState, team: &str, device: &str) -> Result<(), ApiError> {
    if state.teams.is_authorized(team, device).await? {
        Ok(())
    } else {
        tracing::warn!("denied {} access to team {}", device, team);
        Err(SyncError::AccessDenied {
            team: team.to_string(),
            device: device.to_string(),
        }
        .into())
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/get_all_data`: full or delta pull for the calling device.
pub async fn get_all_data(
    State(state): State<AppState>,
    Extension(DeviceId(device)): Extension<DeviceId>,
    Query(query): Query<DataQuery>,
) -> Result<Json<DataResponse>, ApiError> {
    let team = team_or_default(query.team);
    authorize(&state, &team, &device).await?;

    let delta = pull(&state.store, &team, query.since).await?;
    tracing::info!(
        "{} pulled {} {} records from {} (watermark {})",
        device,
        delta.data.len(),
        if delta.full { "full" } else { "delta" },
        team,
        delta.timestamp
    );
    Ok(Json(DataResponse {
        success: true,
        delta,
    }))
}

/// `POST /api/stage_incoming`: classifies a device's dataset and stages it.
pub async fn stage_incoming(
    State(state): State<AppState>,
    extensions: Extensions,
    Json(request): Json<StageRequest>,
) -> Result<Json<StageResponse>, ApiError> {
    let device = request.device_name.trim().to_string();
    if device.is_empty() {
        return Err(ApiError::BadRequest("device_name is required".to_string()));
    }
    let team = team_or_default(Some(request.team));

    state
        .teams
        .record_push(&request.teams, &request.members)
        .await?;
    authorize(&state, &team, &device).await?;

    let origin = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let mut area = state.registry.lock(&team).await?;
    let local = state.store.list(&team).await?;
    let records = classify(&local, &request.data, &request.deleted, &device);

    let slot = area.stage(&device, records, origin);
    let (batch_id, count) = match &slot.batch {
        Some(batch) => (batch.batch_id, batch.records.len()),
        None => (uuid::Uuid::nil(), 0),
    };
    state.registry.save(&team, &mut area).await?;

    Ok(Json(StageResponse {
        success: true,
        batch_id,
        count,
    }))
}

/// `GET /api/get_staged_data`: staged records for one device or all of them.
pub async fn get_staged_data(
    State(state): State<AppState>,
    Extension(DeviceId(caller)): Extension<DeviceId>,
    Query(query): Query<StagedQuery>,
) -> Result<Json<StagedDataResponse>, ApiError> {
    let team = team_or_default(query.team);
    authorize(&state, &team, &caller).await?;
    let filter = match query.device.as_deref() {
        Some(device) => device.parse().unwrap_or(DeviceFilter::All),
        None => DeviceFilter::All,
    };

    let area = state.registry.lock(&team).await?;
    Ok(Json(StagedDataResponse {
        success: true,
        data: area.get_staged(&filter),
    }))
}

/// `POST /api/commit_staged`: applies the selected records of each device.
///
/// Stale selections are skipped and reported per device; replaying a
/// commit returns zero counts.
pub async fn commit_staged(
    State(state): State<AppState>,
    Extension(DeviceId(caller)): Extension<DeviceId>,
    Json(request): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let team = team_or_default(Some(request.team));
    authorize(&state, &team, &caller).await?;

    let mut area = state.registry.lock(&team).await?;
    let report = commit(&state.store, &mut area, &team, &request.commits_by_device).await;
    state.registry.save(&team, &mut area).await?;

    if report.all_stale() {
        tracing::info!(
            "{} committed only stale selections to {}, nothing applied",
            caller,
            team
        );
    }

    Ok(Json(CommitResponse {
        success: true,
        count: report.added,
        deleted: report.deleted,
        devices: report.devices,
    }))
}

/// `POST /api/merge_data`: merges a dataset directly, bypassing review.
pub async fn merge_data(
    State(state): State<AppState>,
    Extension(DeviceId(caller)): Extension<DeviceId>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, ApiError> {
    let team = team_or_default(Some(request.team));
    authorize(&state, &team, &caller).await?;

    // Serializes with commits, which hold the same lock.
    let _area = state.registry.lock(&team).await?;
    let counts = merge(
        &state.store,
        &team,
        request.data,
        request.deleted,
        request.strategy,
    )
    .await?;
    tracing::info!(
        "{} merged data from {} into {} ({}): +{} -{}",
        caller,
        request.source_device,
        team,
        request.strategy,
        counts.added,
        counts.deleted
    );

    Ok(Json(MergeResponse {
        success: true,
        added: counts.added,
        deleted: counts.deleted,
    }))
}

/// `POST /api/update_event`: records a milestone result on the host copy.
pub async fn update_event(
    State(state): State<AppState>,
    Extension(DeviceId(caller)): Extension<DeviceId>,
    Json(request): Json<UpdateEventRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    let team = team_or_default(Some(request.team));
    authorize(&state, &team, &caller).await?;

    // Held across the read and the write so a commit cannot land in between.
    let _area = state.registry.lock(&team).await?;
    let mut patient = state
        .store
        .get(&team, &request.uid)
        .await?
        .ok_or_else(|| SyncError::PatientNotFound(request.uid.clone()))?;
    patient.update_event(
        request.id,
        request.missed_days,
        request.remark,
        request.outcome,
    )?;
    state
        .store
        .apply(&team, &WriteBatch::upsert(patient))
        .await?;

    tracing::info!(
        "{} updated event {} of {} in {}",
        caller,
        request.id,
        request.uid,
        team
    );
    Ok(Json(ApiMessage::ok()))
}

/// `GET /api/get_host_info`: host name, known devices and patient counts.
pub async fn get_host_info(State(state): State<AppState>) -> Result<Json<HostInfo>, ApiError> {
    let devices = state
        .registry
        .devices()
        .await?
        .into_iter()
        .map(|(_, device)| device)
        .collect();

    let mut patients = PatientCounts::default();
    for team in state.teams.teams().await? {
        let counts = PatientCounts::tally(&state.store.list(&team.slug).await?);
        patients.active += counts.active;
        patients.cured += counts.cured;
        patients.closed += counts.closed;
    }

    Ok(Json(HostInfo {
        hostname: state.host_name.to_string(),
        devices,
        patients,
    }))
}
