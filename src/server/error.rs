use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use tbtrack_core::sync::ApiMessage;
use tbtrack_core::{StoreError, SyncError};

/// Error returned by a route handler, rendered as `{success: false, message}`.
#[derive(Debug)]
pub enum ApiError {
    Sync(SyncError),
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(e) => match e {
                SyncError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                SyncError::PatientNotFound(_) | SyncError::EventNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                SyncError::InvalidOutcome { .. } | SyncError::InvalidMissedDays { .. } => {
                    StatusCode::BAD_REQUEST
                }
                SyncError::StaleReference { .. } => StatusCode::CONFLICT,
                SyncError::NetworkUnavailable { .. } | SyncError::HostRejected { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Sync(e) => write!(f, "{}", e),
            ApiError::BadRequest(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Sync(SyncError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}: {}", status, self);
        }
        (status, Json(ApiMessage::error(self.to_string()))).into_response()
    }
}
