//! Error types for logfleet
//!
//! Error taxonomy covering the worker registry, chunk assignment,
//! job submission and transport failures.

use thiserror::Error;

use crate::coordinator::planner::ChunkId;

/// Primary error type for all logfleet operations
#[derive(Debug, Error)]
pub enum FleetError {
    // ========== Registry Errors ==========

    /// Health report or lookup for a worker that never registered
    #[error("Unknown worker: {worker_id}")]
    UnknownWorker { worker_id: String },

    // ========== Assignment Errors ==========

    /// A chunk was dispatched while it already had a pending assignment
    #[error("Chunk {chunk_id} already has a pending assignment on worker {owner}")]
    DuplicatePendingAssignment { chunk_id: ChunkId, owner: String },

    /// Chunk id is not part of the active job
    #[error("Chunk {chunk_id} is not part of this job")]
    UnknownChunk { chunk_id: ChunkId },

    /// Chunk is already completed or permanently failed
    #[error("Chunk {chunk_id} is already resolved")]
    ChunkResolved { chunk_id: ChunkId },

    /// No worker is currently healthy
    #[error("No healthy workers available")]
    NoHealthyWorkers,

    /// Chunk exhausted its dispatch attempts
    #[error("Chunk {chunk_id} failed permanently after {attempts} attempts")]
    ChunkPermanentlyFailed { chunk_id: ChunkId, attempts: u32 },

    /// Chunk size must be positive
    #[error("Invalid chunk size: {chunk_size}")]
    InvalidChunkSize { chunk_size: u64 },

    // ========== Job Errors ==========

    /// Input file missing or unreadable
    #[error("Cannot read {path}: {reason}")]
    FileUnreadable { path: String, reason: String },

    /// Another job is running on this coordinator
    #[error("A job is already in progress")]
    JobInProgress,

    // ========== Transport Errors ==========

    /// Connection failed
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Worker answered a chunk request with a non-success status
    #[error("Worker {worker_id} rejected request with status {status}")]
    WorkerRejected { worker_id: String, status: u16 },

    /// Invalid message format
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    // ========== Runtime Errors ==========

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FleetError {
    /// Returns true if the operation may succeed when retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::NoHealthyWorkers
                | FleetError::ConnectionFailed { .. }
                | FleetError::WorkerRejected { .. }
                | FleetError::JobInProgress
        )
    }

    /// Returns true if this error means coordinator state is inconsistent
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::DuplicatePendingAssignment { .. } | FleetError::Internal { .. }
        )
    }
}

/// Result type alias for logfleet operations
pub type Result<T> = std::result::Result<T, FleetError>;
