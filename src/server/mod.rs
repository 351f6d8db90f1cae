//! HTTP host: receives pushes, stages them for review, and serves pulls.
//!
//! # Endpoints
//!
//! - `GET /health`
//! - `POST /api/stage_incoming`
//! - `GET /api/get_host_info`
//!
//! These require `X-Device-ID`, and the device must be allowed in the team:
//!
//! - `GET /api/get_all_data`
//! - `GET /api/get_staged_data`
//! - `POST /api/commit_staged`
//! - `POST /api/merge_data`
//! - `POST /api/update_event`

mod error;
mod handlers;
mod registry;

pub use error::ApiError;
pub use registry::TeamRegistry;

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use tbtrack_core::sync::DEVICE_HEADER;

use crate::db::{SqliteStore, StagingRepository, TeamRepository};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub teams: TeamRepository,
    pub registry: Arc<TeamRegistry>,
    pub host_name: Arc<str>,
}

impl AppState {
    pub fn new(pool: SqlitePool, host_name: &str) -> Self {
        Self {
            store: SqliteStore::new(pool.clone()),
            teams: TeamRepository::new(pool.clone()),
            registry: Arc::new(TeamRegistry::new(StagingRepository::new(pool))),
            host_name: Arc::from(host_name),
        }
    }
}

/// Calling device, taken from the `X-Device-ID` header.
#[derive(Debug, Clone)]
pub struct DeviceId(pub String);

async fn device_identity(mut request: Request, next: Next) -> Response {
    let device = request
        .headers()
        .get(DEVICE_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    match device {
        Some(device) => {
            request.extensions_mut().insert(DeviceId(device));
            next.run(request).await
        }
        None => ApiError::BadRequest(format!("{} header required", DEVICE_HEADER)).into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    let identified = Router::new()
        .route("/api/get_all_data", get(handlers::get_all_data))
        .route("/api/get_staged_data", get(handlers::get_staged_data))
        .route("/api/commit_staged", post(handlers::commit_staged))
        .route("/api/merge_data", post(handlers::merge_data))
        .route("/api/update_event", post(handlers::update_event))
        .route_layer(middleware::from_fn(device_identity));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/stage_incoming", post(handlers::stage_incoming))
        .route("/api/get_host_info", get(handlers::get_host_info))
        .merge(identified)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
