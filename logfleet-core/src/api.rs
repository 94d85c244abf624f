//! HTTP error mapping shared by the coordinator and worker services

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::FleetError;
use crate::protocol::{ErrorDetail, ErrorResponse};

/// A `FleetError` rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            FleetError::UnknownWorker { .. } => (StatusCode::NOT_FOUND, "UNKNOWN_WORKER"),
            FleetError::UnknownChunk { .. } => (StatusCode::NOT_FOUND, "UNKNOWN_CHUNK"),
            FleetError::FileUnreadable { .. } => (StatusCode::BAD_REQUEST, "FILE_UNREADABLE"),
            FleetError::InvalidChunkSize { .. } => (StatusCode::BAD_REQUEST, "INVALID_CHUNK_SIZE"),
            FleetError::InvalidMessage { .. } => (StatusCode::BAD_REQUEST, "INVALID_MESSAGE"),
            FleetError::JobInProgress => (StatusCode::CONFLICT, "JOB_IN_PROGRESS"),
            FleetError::NoHealthyWorkers => (StatusCode::SERVICE_UNAVAILABLE, "NO_HEALTHY_WORKERS"),
            FleetError::ShutdownInProgress => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTDOWN_IN_PROGRESS")
            }
            FleetError::ConnectionFailed { .. } | FleetError::WorkerRejected { .. } => {
                (StatusCode::BAD_GATEWAY, "WORKER_UNREACHABLE")
            }
            FleetError::DuplicatePendingAssignment { .. }
            | FleetError::ChunkResolved { .. }
            | FleetError::ChunkPermanentlyFailed { .. }
            | FleetError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                error_code: code.to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
