//! Worker process
//!
//! Accepts chunk requests over HTTP, analyzes them in the background and
//! submits metrics back to the coordinator. A heartbeat loop keeps the
//! worker healthy in the coordinator's registry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::analyzer::analyze_chunk;
use super::client::CoordinatorClient;
use super::state::{WorkerPhase, WorkerState, WorkerStatusReport};
use crate::api::ApiError;
use crate::coordinator::membership::WorkerStatus;
use crate::error::{FleetError, Result};
use crate::protocol::{Ack, ProcessChunkRequest, SubmitResultRequest, PROCESS_PATH};
use crate::shutdown::ShutdownSignal;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier reported to the coordinator
    pub worker_id: String,
    /// Base URL the coordinator should send chunks to
    pub advertise_addr: Option<String>,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Chunks analyzed at the same time
    pub max_concurrent_chunks: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            advertise_addr: None,
            heartbeat_interval: Duration::from_secs(crate::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            max_concurrent_chunks: num_cpus::get(),
        }
    }
}

/// A chunk-processing worker
pub struct Worker {
    config: WorkerConfig,
    client: CoordinatorClient,
    state: Arc<WorkerState>,
    permits: Arc<Semaphore>,
    shutdown: ShutdownSignal,
}

impl Worker {
    pub fn new(config: WorkerConfig, client: CoordinatorClient) -> Self {
        let state = Arc::new(WorkerState::new(config.worker_id.clone()));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_chunks.max(1)));
        Self {
            config,
            client,
            state,
            permits,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Register once
    pub async fn register(&self) -> Result<()> {
        self.client
            .register(self.id(), self.config.advertise_addr.clone())
            .await?;
        self.state.set_phase(WorkerPhase::Registered).await;
        Ok(())
    }

    /// Register, retrying while the coordinator is unreachable
    pub async fn register_with_retry(&self) -> Result<()> {
        loop {
            match self.register().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!("Registration failed, retrying: {}", e);
                    tokio::select! {
                        _ = sleep(self.config.heartbeat_interval) => {}
                        _ = self.shutdown.wait() => return Err(FleetError::ShutdownInProgress),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Accept a chunk request and process it in the background
    pub async fn accept(self: &Arc<Self>, request: ProcessChunkRequest) -> Result<()> {
        if self.shutdown.is_shutdown() {
            return Err(FleetError::ShutdownInProgress);
        }
        if request.filepath.is_empty() {
            return Err(FleetError::InvalidMessage {
                reason: "filepath must not be empty".into(),
            });
        }

        debug!(
            "Accepted chunk {} of job {} ({}@{}+{})",
            request.chunk_id, request.job_id, request.filepath, request.offset, request.length
        );
        self.state.chunk_started(request.job_id).await;

        let worker = self.clone();
        tokio::spawn(async move {
            worker.process(request).await;
        });
        Ok(())
    }

    async fn process(&self, request: ProcessChunkRequest) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.state.chunk_finished(false);
                return;
            }
        };

        let metrics = analyze_chunk(&request.filepath, request.offset, request.length).await;
        drop(permit);

        let submit = SubmitResultRequest {
            job_id: request.job_id,
            worker_id: self.id().to_string(),
            chunk_id: request.chunk_id,
            metrics,
        };
        match self.client.submit_result(&submit).await {
            Ok(_) => self.state.chunk_finished(true),
            Err(e) => {
                // The coordinator reassigns the chunk once it times out
                error!("Dropping result for chunk {}: {}", request.chunk_id, e);
                self.state.chunk_finished(false);
            }
        }
    }

    /// Spawn the heartbeat loop; it stops when shutdown is triggered
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(worker.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = worker.shutdown.wait() => break,
                }

                match worker.client.send_heartbeat(worker.id(), WorkerStatus::Healthy).await {
                    Ok(_) => {}
                    Err(FleetError::UnknownWorker { .. }) => {
                        info!("Coordinator does not know this worker, registering again");
                        if let Err(e) = worker.register().await {
                            warn!("Re-registration failed: {}", e);
                        }
                    }
                    Err(e) => warn!("Heartbeat failed: {}", e),
                }
            }
            debug!("Heartbeat loop stopped");
        })
    }

    /// Stop accepting chunks, drain in-flight ones and report unhealthy
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.state.set_phase(WorkerPhase::ShuttingDown).await;
        self.shutdown.shutdown();

        let drained = tokio::time::timeout(drain_timeout, async {
            while self.state.in_flight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Shutting down with {} chunks still in flight",
                self.state.in_flight()
            );
        }

        if let Err(e) = self
            .client
            .send_heartbeat(self.id(), WorkerStatus::Unhealthy)
            .await
        {
            warn!("Could not report shutdown to coordinator: {}", e);
        }
        info!("Worker {} stopped", self.id());
    }
}

/// Build the worker router
pub fn worker_router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route(PROCESS_PATH, post(process_chunk))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(worker)
}

async fn process_chunk(
    State(worker): State<Arc<Worker>>,
    Json(request): Json<ProcessChunkRequest>,
) -> std::result::Result<(StatusCode, Json<Ack>), ApiError> {
    worker.accept(request).await?;
    Ok((StatusCode::ACCEPTED, Json(Ack::ok())))
}

async fn status(State(worker): State<Arc<Worker>>) -> Json<WorkerStatusReport> {
    Json(worker.state().report().await)
}
