//! Per-job state
//!
//! One job owns its chunk table and running aggregate behind a single
//! mutex, so completing a chunk and folding its metrics is one critical
//! section. The lock is never held across an await.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use uuid::Uuid;

use super::aggregator::{AggregateResult, Aggregator};
use super::assignment::AssignmentTracker;
use super::planner::{Chunk, ChunkId};
use crate::protocol::ChunkMetrics;

/// Mutable state of a job
#[derive(Debug)]
pub struct JobState {
    pub tracker: AssignmentTracker,
    pub aggregator: Aggregator,
}

/// A file being processed
pub struct Job {
    id: Uuid,
    filepath: String,
    state: Mutex<JobState>,
    progress: Notify,
}

impl Job {
    /// Create a job with every chunk unassigned
    pub fn new(filepath: impl Into<String>, chunks: &[Chunk]) -> Self {
        Self {
            id: Uuid::new_v4(),
            filepath: filepath.into(),
            state: Mutex::new(JobState {
                tracker: AssignmentTracker::new(chunks),
                aggregator: Aggregator::new(chunks.len() as u64),
            }),
            progress: Notify::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    /// Lock the job state
    pub fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock()
    }

    /// Complete a chunk and fold its metrics if the report is accepted
    pub fn accept_result(&self, worker_id: &str, chunk_id: ChunkId, metrics: &ChunkMetrics) -> bool {
        let mut state = self.lock();
        if !state.tracker.complete(chunk_id, worker_id) {
            return false;
        }
        state.aggregator.fold(metrics);
        true
    }

    /// Release every chunk pending on a worker
    pub fn reassign_worker(&self, worker_id: &str) -> Vec<Chunk> {
        self.lock().tracker.reassign_worker(worker_id)
    }

    /// Release overdue chunks
    pub fn release_expired(&self, timeout: Duration) -> Vec<(Chunk, String)> {
        self.lock().tracker.release_expired(timeout)
    }

    /// Give up on every chunk not completed yet
    pub fn fail_unresolved(&self, reason: &str) -> Vec<Chunk> {
        self.lock().tracker.fail_unresolved(reason)
    }

    /// Completed and total chunk counts
    pub fn progress(&self) -> (u64, u64) {
        let state = self.lock();
        let current = state.aggregator.current();
        (current.chunks_completed, current.chunks_total)
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().tracker.is_resolved()
    }

    /// Wake the job loop
    pub fn notify_progress(&self) {
        // notify_one keeps a permit when nobody is waiting yet
        self.progress.notify_one();
    }

    /// Wait until something changed for this job
    pub async fn progressed(&self) {
        self.progress.notified().await;
    }

    /// Snapshot of the aggregate, with the chunks that failed so far
    pub fn result(&self) -> AggregateResult {
        let state = self.lock();
        state
            .aggregator
            .clone()
            .finish(state.tracker.failed_chunks())
    }
}
