//! Logfleet Core - distributed log-chunk processing
//!
//! This crate provides:
//! - A coordinator that splits a log file into byte-range chunks
//! - Worker membership with heartbeat liveness
//! - Round-robin dispatch with bounded retries and reassignment
//! - Order-independent aggregation of per-chunk metrics
//! - The worker process that analyzes chunks

pub mod api;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod shutdown;
pub mod worker;

pub use coordinator::{AggregateResult, Coordinator, CoordinatorConfig};
pub use error::{FleetError, Result};
pub use worker::{Worker, WorkerConfig};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Default heartbeat timeout in seconds
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 15;

/// Default chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default dispatch attempts per chunk
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
