//! Coordinator for job distribution
//!
//! Chunk planning, worker membership, assignment tracking, dispatch,
//! aggregation, and the HTTP service workers talk to.

pub mod aggregator;
pub mod assignment;
pub mod dispatcher;
pub mod job;
pub mod leader;
pub mod membership;
pub mod planner;
pub mod service;

pub use aggregator::{AggregateResult, Aggregator, FailedChunk};
pub use assignment::{Assignment, AssignmentState, AssignmentTracker};
pub use dispatcher::{ChunkTransport, DispatchConfig, Dispatcher, HttpChunkTransport};
pub use job::Job;
pub use leader::{Coordinator, CoordinatorConfig};
pub use membership::{RegistryConfig, WorkerRegistry, WorkerStatus};
pub use planner::{plan, Chunk, ChunkId};
pub use service::coordinator_router;
