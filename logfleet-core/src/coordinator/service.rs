//! Coordinator HTTP service
//!
//! Thin axum adapters over `Coordinator`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use super::aggregator::AggregateResult;
use super::leader::Coordinator;
use super::membership::WorkerSnapshot;
use crate::api::ApiError;
use crate::error::FleetError;
use crate::protocol::{
    Ack, HealthRequest, JobRequest, RegisterRequest, SubmitResultRequest, HEALTH_PATH,
    JOBS_PATH, REGISTER_PATH, SUBMIT_PATH,
};

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the coordinator router
pub fn coordinator_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route(REGISTER_PATH, post(register))
        .route(HEALTH_PATH, post(health))
        .route(SUBMIT_PATH, post(submit))
        .route(JOBS_PATH, post(run_job))
        .route("/workers", get(workers))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn register(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<Ack>> {
    if req.protocol_version != crate::PROTOCOL_VERSION {
        return Err(FleetError::InvalidMessage {
            reason: format!(
                "protocol version mismatch: server={}, client={}",
                crate::PROTOCOL_VERSION,
                req.protocol_version
            ),
        }
        .into());
    }
    coordinator.register(&req.worker_id, req.address).await?;
    Ok(Json(Ack::ok()))
}

async fn health(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<HealthRequest>,
) -> ApiResult<Json<Ack>> {
    coordinator.report_health(&req.worker_id, req.status).await?;
    Ok(Json(Ack::ok()))
}

async fn submit(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<SubmitResultRequest>,
) -> Json<Ack> {
    let accepted = coordinator.submit_result(&req);
    Json(Ack::submitted(accepted))
}

async fn run_job(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<JobRequest>,
) -> ApiResult<Json<AggregateResult>> {
    let result = coordinator.process(&req.filepath).await?;
    Ok(Json(result))
}

async fn workers(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<WorkerSnapshot>> {
    Json(coordinator.registry().snapshot().await)
}

async fn metrics() -> impl IntoResponse {
    (StatusCode::OK, crate::metrics::gather_system_metrics())
}
