//! Chunk dispatch
//!
//! Sends unassigned chunks to healthy workers round-robin. A worker that
//! rejects a request or cannot be reached is marked unhealthy and its
//! pending chunks are re-dispatched, up to `max_attempts` per chunk.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::assignment::Assignment;
use super::job::Job;
use super::membership::WorkerRegistry;
use crate::error::{FleetError, Result};
use crate::metrics::standard;
use crate::protocol::{ProcessChunkRequest, PROCESS_PATH};

/// Network seam between the dispatcher and workers
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Deliver a chunk request; `Ok` means the worker accepted it
    async fn send_chunk(
        &self,
        worker_id: &str,
        address: &str,
        request: &ProcessChunkRequest,
    ) -> Result<()>;
}

/// Sends chunk requests as JSON over HTTP
pub struct HttpChunkTransport {
    client: Client,
}

impl HttpChunkTransport {
    /// Create a transport with a per-request timeout
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FleetError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn send_chunk(
        &self,
        worker_id: &str,
        address: &str,
        request: &ProcessChunkRequest,
    ) -> Result<()> {
        let url = format!("{}{}", address.trim_end_matches('/'), PROCESS_PATH);

        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| FleetError::ConnectionFailed {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(FleetError::WorkerRejected {
                worker_id: worker_id.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Attempts per chunk before it is reported as permanently failed
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of one distribution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributeReport {
    /// Chunk requests workers accepted
    pub dispatched: usize,
    /// Pending chunks released after a failed send
    pub reassigned: usize,
    /// Chunks that ran out of attempts during this pass
    pub failed: usize,
}

/// Assigns chunks to workers and sends them
pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    transport: Arc<dyn ChunkTransport>,
    config: DispatchConfig,
    cursor: AtomicUsize,
    /// Serializes passes so two of them never race on one chunk
    pass: Mutex<()>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        registry: Arc<WorkerRegistry>,
        transport: Arc<dyn ChunkTransport>,
        mut config: DispatchConfig,
    ) -> Self {
        if config.max_attempts == 0 {
            warn!("max_attempts must be at least 1, using 1");
            config.max_attempts = 1;
        }
        Self {
            registry,
            transport,
            config,
            cursor: AtomicUsize::new(0),
            pass: Mutex::new(()),
        }
    }

    /// Restart round-robin at the first healthy worker
    pub fn reset_cursor(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Pick the next worker, skipping `avoid` when there is a choice
    fn next_worker(&self, healthy: &[String], avoid: Option<&str>) -> String {
        let len = healthy.len();
        let mut idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        if len > 1 && avoid == Some(healthy[idx].as_str()) {
            idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        }
        healthy[idx].clone()
    }

    /// Send every dispatchable chunk of the job
    ///
    /// Fails with `NoHealthyWorkers` when a chunk is waiting and no worker
    /// is healthy; chunks not sent yet stay unassigned for the next pass.
    pub async fn distribute(&self, job: &Job) -> Result<DistributeReport> {
        let _pass = self.pass.lock().await;
        let mut report = DistributeReport::default();

        loop {
            let (ready, newly_failed) = {
                let mut state = job.lock();
                let failed_before = state.tracker.failed_count();
                let ready = state.tracker.take_dispatchable(self.config.max_attempts);
                (ready, state.tracker.failed_count() - failed_before)
            };
            if newly_failed > 0 {
                report.failed += newly_failed;
                standard::CHUNKS_FAILED.inc_by(newly_failed as u64);
            }
            if ready.is_empty() {
                break;
            }

            for item in ready {
                let healthy = self.registry.healthy_workers().await;
                if healthy.is_empty() {
                    warn!("No healthy workers, {} chunks waiting", job.lock().tracker.unassigned_count());
                    return Err(FleetError::NoHealthyWorkers);
                }
                let worker_id = self.next_worker(&healthy, item.previous_worker.as_deref());

                let assigned = job.lock().tracker.assign(item.chunk.chunk_id, &worker_id);
                let assignment = match assigned {
                    Ok(assignment) => assignment,
                    Err(FleetError::ChunkResolved { .. }) => continue,
                    Err(e) if e.is_fatal() => {
                        error!("Job {} chunk table is inconsistent: {}", job.id(), e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("Skipping chunk {}: {}", item.chunk.chunk_id, e);
                        continue;
                    }
                };

                match self.send(job, &assignment).await {
                    Ok(()) => {
                        report.dispatched += 1;
                        standard::CHUNKS_DISPATCHED.inc();
                    }
                    Err(e) => {
                        warn!(
                            "Sending chunk {} to worker {} failed: {}",
                            assignment.chunk.chunk_id, worker_id, e
                        );
                        standard::SEND_FAILURES.inc();
                        if let Err(e) = self.registry.mark_unhealthy(&worker_id).await {
                            warn!("Could not mark worker {} unhealthy: {}", worker_id, e);
                        }
                        let released = job.reassign_worker(&worker_id);
                        report.reassigned += released.len();
                        standard::CHUNKS_REASSIGNED.inc_by(released.len() as u64);
                    }
                }
            }
        }

        standard::PENDING_CHUNKS.set(job.lock().tracker.pending_count() as i64);
        if report.dispatched > 0 || report.reassigned > 0 {
            info!(
                "Dispatch pass for job {}: {} sent, {} reassigned, {} failed",
                job.id(),
                report.dispatched,
                report.reassigned,
                report.failed
            );
        }
        Ok(report)
    }

    async fn send(&self, job: &Job, assignment: &Assignment) -> Result<()> {
        let address = self.registry.address(&assignment.worker_id).await?;
        let request = ProcessChunkRequest::new(job.id(), job.filepath(), &assignment.chunk);

        debug!(
            "Sending chunk {} (attempt {}) to {} at {}",
            request.chunk_id, assignment.attempt, assignment.worker_id, address
        );
        let start = Instant::now();
        let sent = self
            .transport
            .send_chunk(&assignment.worker_id, &address, &request)
            .await;
        standard::DISPATCH_DURATION.observe_since(start);
        sent
    }
}
