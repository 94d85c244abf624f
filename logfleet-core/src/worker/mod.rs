//! Worker-side logic
//!
//! Chunk analysis, worker state, the coordinator client and the worker
//! HTTP service.

pub mod analyzer;
pub mod client;
pub mod service;
pub mod state;

pub use analyzer::{analyze_chunk, count_lines};
pub use client::{ClientConfig, CoordinatorClient};
pub use service::{worker_router, Worker, WorkerConfig};
pub use state::{WorkerPhase, WorkerState};
