//! Coordinator leader logic
//!
//! Composes the registry, dispatcher and job state: serves the
//! worker-facing operations and drives `process` for one file at a time.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator::AggregateResult;
use super::dispatcher::{ChunkTransport, DispatchConfig, Dispatcher, HttpChunkTransport};
use super::job::Job;
use super::membership::{RegistryConfig, WorkerRegistry, WorkerStatus};
use super::planner::{plan, Chunk};
use crate::error::{FleetError, Result};
use crate::metrics::standard;
use crate::protocol::SubmitResultRequest;
use crate::shutdown::ShutdownSignal;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Registry configuration
    pub registry: RegistryConfig,
    /// Dispatch configuration
    pub dispatch: DispatchConfig,
    /// Chunk size in bytes
    pub chunk_size: u64,
    /// Interval of the liveness check
    pub liveness_interval: Duration,
    /// Pending chunks older than this are re-dispatched
    pub chunk_timeout: Option<Duration>,
    /// How long a job waits for a healthy worker before giving up
    pub no_worker_timeout: Duration,
    /// Timeout for chunk requests sent to workers
    pub request_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            dispatch: DispatchConfig::default(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            liveness_interval: Duration::from_secs(crate::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            chunk_timeout: Some(Duration::from_secs(120)),
            no_worker_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Main coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<WorkerRegistry>,
    dispatcher: Dispatcher,
    active_job: Mutex<Option<Arc<Job>>>,
    /// Held for the duration of `process`
    job_slot: tokio::sync::Mutex<()>,
    shutdown: ShutdownSignal,
}

impl Coordinator {
    /// Create a coordinator sending chunks over HTTP
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let transport = Arc::new(HttpChunkTransport::new(config.request_timeout)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Create a coordinator with a custom chunk transport
    pub fn with_transport(config: CoordinatorConfig, transport: Arc<dyn ChunkTransport>) -> Self {
        let registry = Arc::new(WorkerRegistry::new(config.registry.clone()));
        let dispatcher = Dispatcher::new(registry.clone(), transport, config.dispatch.clone());

        Self {
            config,
            registry,
            dispatcher,
            active_job: Mutex::new(None),
            job_slot: tokio::sync::Mutex::new(()),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Id of the job being processed, if any
    pub fn active_job_id(&self) -> Option<Uuid> {
        self.current_job().map(|job| job.id())
    }

    fn current_job(&self) -> Option<Arc<Job>> {
        self.active_job.lock().clone()
    }

    fn wake_job(&self) {
        if let Some(job) = self.current_job() {
            job.notify_progress();
        }
    }

    async fn update_worker_gauge(&self) {
        standard::HEALTHY_WORKERS.set(self.registry.healthy_count().await as i64);
    }

    /// Register a worker
    pub async fn register(&self, worker_id: &str, address: Option<String>) -> Result<()> {
        if worker_id.trim().is_empty() {
            return Err(FleetError::InvalidMessage {
                reason: "worker_id must not be empty".into(),
            });
        }
        self.registry.register(worker_id, address).await;
        self.update_worker_gauge().await;
        // A job may be waiting for a healthy worker
        self.wake_job();
        Ok(())
    }

    /// Process a heartbeat or health report
    pub async fn report_health(&self, worker_id: &str, status: WorkerStatus) -> Result<()> {
        let previous = match self.registry.report_health(worker_id, status).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Rejected health report: {}", e);
                return Err(e);
            }
        };

        match (previous, status) {
            (WorkerStatus::Healthy, WorkerStatus::Unhealthy) => {
                self.reassign_from(worker_id);
            }
            (WorkerStatus::Unhealthy, WorkerStatus::Healthy) => self.wake_job(),
            _ => {}
        }
        self.update_worker_gauge().await;
        Ok(())
    }

    /// Mark a worker unhealthy and release its pending chunks
    pub async fn mark_unhealthy(&self, worker_id: &str) -> Result<Vec<Chunk>> {
        self.registry.mark_unhealthy(worker_id).await?;
        self.update_worker_gauge().await;
        Ok(self.reassign_from(worker_id))
    }

    fn reassign_from(&self, worker_id: &str) -> Vec<Chunk> {
        let Some(job) = self.current_job() else {
            return Vec::new();
        };
        let released = job.reassign_worker(worker_id);
        if !released.is_empty() {
            standard::CHUNKS_REASSIGNED.inc_by(released.len() as u64);
            job.notify_progress();
        }
        released
    }

    /// Accept a chunk result; returns true if it was folded into the aggregate
    pub fn submit_result(&self, request: &SubmitResultRequest) -> bool {
        let accepted = match self.current_job() {
            Some(job) if job.id() == request.job_id => {
                let accepted =
                    job.accept_result(&request.worker_id, request.chunk_id, &request.metrics);
                if accepted {
                    let (completed, total) = job.progress();
                    debug!("Job {}: {}/{} chunks completed", job.id(), completed, total);
                    job.notify_progress();
                }
                accepted
            }
            _ => {
                debug!(
                    "Result for chunk {} of job {} does not belong to the active job",
                    request.chunk_id, request.job_id
                );
                false
            }
        };

        if accepted {
            standard::CHUNKS_COMPLETED.inc();
            debug!(
                "Accepted chunk {} from worker {}",
                request.chunk_id, request.worker_id
            );
        } else {
            standard::DUPLICATE_RESULTS.inc();
        }
        accepted
    }

    /// Mark silent workers unhealthy and release overdue chunks
    ///
    /// Returns the workers that were marked unhealthy.
    pub async fn run_liveness_check(&self) -> Vec<String> {
        let expired = self.registry.check_liveness().await;
        for worker_id in &expired {
            self.reassign_from(worker_id);
        }

        if let (Some(job), Some(timeout)) = (self.current_job(), self.config.chunk_timeout) {
            let released = job.release_expired(timeout);
            if !released.is_empty() {
                standard::CHUNKS_REASSIGNED.inc_by(released.len() as u64);
                job.notify_progress();
            }
        }

        self.update_worker_gauge().await;
        expired
    }

    /// Run the liveness check on its interval until shutdown
    pub fn spawn_liveness_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(coordinator.config.liveness_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.run_liveness_check().await;
                    }
                    _ = coordinator.shutdown.wait() => {
                        info!("Liveness monitor stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Process a file and return its aggregate
    ///
    /// Fails before dispatching anything if the file cannot be read. Worker
    /// failures never fail the job; chunks that could not be processed are
    /// listed in the result instead.
    pub async fn process(&self, filepath: impl AsRef<Path>) -> Result<AggregateResult> {
        let _slot = self
            .job_slot
            .try_lock()
            .map_err(|_| FleetError::JobInProgress)?;
        if self.shutdown.is_shutdown() {
            return Err(FleetError::ShutdownInProgress);
        }

        let (filepath, file_size) = inspect_file(filepath.as_ref()).await?;
        let chunks = plan(file_size, self.config.chunk_size)?;
        let job = Arc::new(Job::new(filepath, &chunks));

        info!(
            "Starting job {} for {} ({} bytes, {} chunks)",
            job.id(),
            job.filepath(),
            file_size,
            chunks.len()
        );

        let _active = ActiveJob::install(&self.active_job, job.clone());
        self.dispatcher.reset_cursor();
        let start = std::time::Instant::now();

        let outcome = self.drive(&job).await;
        standard::JOB_DURATION.observe_since(start);
        outcome?;

        let result = job.result();
        info!(
            "Job {} finished: {}/{} chunks, {} lines, {} errors, {} warnings, {} failed",
            job.id(),
            result.chunks_completed,
            result.chunks_total,
            result.total_lines,
            result.total_errors,
            result.total_warnings,
            result.failed_chunks.len()
        );
        Ok(result)
    }

    /// Dispatch and wait until every chunk is resolved
    async fn drive(&self, job: &Job) -> Result<()> {
        let mut ticker = interval(self.config.liveness_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut starved_since: Option<Instant> = None;

        loop {
            match self.dispatcher.distribute(job).await {
                Ok(_) => starved_since = None,
                Err(FleetError::NoHealthyWorkers) => {
                    let since = *starved_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.config.no_worker_timeout {
                        let failed = job.fail_unresolved("no healthy workers");
                        warn!(
                            "Job {}: no healthy workers for {:?}, {} chunks failed",
                            job.id(),
                            self.config.no_worker_timeout,
                            failed.len()
                        );
                        standard::CHUNKS_FAILED.inc_by(failed.len() as u64);
                    }
                }
                Err(e) => return Err(e),
            }

            if job.is_resolved() {
                return Ok(());
            }

            tokio::select! {
                _ = job.progressed() => {}
                _ = ticker.tick() => {
                    self.run_liveness_check().await;
                }
                _ = self.shutdown.wait() => {
                    warn!("Job {} interrupted by shutdown", job.id());
                    return Err(FleetError::ShutdownInProgress);
                }
            }
        }
    }
}

/// Keeps a job installed as the active one until dropped
///
/// Dropping the `process` future (a disconnected `/jobs` client, a caller
/// timeout) clears the job as well as a normal return does.
struct ActiveJob<'a> {
    slot: &'a Mutex<Option<Arc<Job>>>,
}

impl<'a> ActiveJob<'a> {
    fn install(slot: &'a Mutex<Option<Arc<Job>>>, job: Arc<Job>) -> Self {
        *slot.lock() = Some(job);
        Self { slot }
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        let job = self.slot.lock().take();
        if let Some(job) = job.filter(|job| !job.is_resolved()) {
            warn!("Job {} abandoned before completion", job.id());
        }
        standard::PENDING_CHUNKS.set(0);
    }
}

/// Resolve the file path and size, failing if it cannot be read
async fn inspect_file(path: &Path) -> Result<(String, u64)> {
    let unreadable = |reason: String| FleetError::FileUnreadable {
        path: path.display().to_string(),
        reason,
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unreadable("not a regular file".into()));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    let absolute = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| unreadable(e.to_string()))?;

    Ok((absolute.display().to_string(), metadata.len()))
}
