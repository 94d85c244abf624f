//! Worker state machine
//!
//! Tracks local worker state and transitions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Worker lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Not yet registered
    Initializing,
    /// Registered with coordinator
    Registered,
    /// Draining in-flight chunks before exit
    ShuttingDown,
}

/// Point-in-time view served on the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusReport {
    pub worker_id: String,
    pub phase: WorkerPhase,
    pub in_flight: usize,
    pub chunks_processed: u64,
    pub submit_failures: u64,
    pub last_job: Option<Uuid>,
}

/// Local worker state
pub struct WorkerState {
    worker_id: String,
    phase: RwLock<WorkerPhase>,
    /// Chunks accepted but not yet submitted
    in_flight: AtomicUsize,
    chunks_processed: AtomicU64,
    submit_failures: AtomicU64,
    last_job: RwLock<Option<Uuid>>,
}

impl WorkerState {
    /// Create new worker state
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            phase: RwLock::new(WorkerPhase::Initializing),
            in_flight: AtomicUsize::new(0),
            chunks_processed: AtomicU64::new(0),
            submit_failures: AtomicU64::new(0),
            last_job: RwLock::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Get current phase
    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.read().await
    }

    /// Set phase
    pub async fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.write().await = phase;
    }

    /// Record an accepted chunk
    pub async fn chunk_started(&self, job_id: Uuid) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        *self.last_job.write().await = Some(job_id);
    }

    /// Record a chunk whose result was handed to the coordinator (or dropped)
    pub fn chunk_finished(&self, submitted: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if submitted {
            self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.submit_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn chunks_processed(&self) -> u64 {
        self.chunks_processed.load(Ordering::Relaxed)
    }

    /// Snapshot for the status endpoint
    pub async fn report(&self) -> WorkerStatusReport {
        WorkerStatusReport {
            worker_id: self.worker_id.clone(),
            phase: self.phase().await,
            in_flight: self.in_flight(),
            chunks_processed: self.chunks_processed(),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            last_job: *self.last_job.read().await,
        }
    }
}
