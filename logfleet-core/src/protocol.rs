//! Wire messages exchanged between coordinator, workers and job clients
//!
//! All messages are JSON bodies on plain HTTP routes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::membership::WorkerStatus;
use crate::coordinator::planner::{Chunk, ChunkId};

/// Route a worker registers on
pub const REGISTER_PATH: &str = "/register";
/// Route heartbeats and health reports go to
pub const HEALTH_PATH: &str = "/health";
/// Route chunk results go to
pub const SUBMIT_PATH: &str = "/submit";
/// Route jobs are submitted on
pub const JOBS_PATH: &str = "/jobs";
/// Worker route receiving chunk requests
pub const PROCESS_PATH: &str = "/process";

/// Metrics computed by a worker over one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetrics {
    /// Lines starting inside the chunk
    pub lines: u64,
    /// Lines containing `ERROR`
    pub errors: u64,
    /// Lines containing `WARNING`
    pub warnings: u64,
    /// Bytes read for those lines
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: String,
    /// Base URL the coordinator sends chunk requests to
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRequest {
    pub worker_id: String,
    pub status: WorkerStatus,
}

/// Coordinator to worker: process one chunk of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessChunkRequest {
    pub job_id: Uuid,
    pub chunk_id: ChunkId,
    pub filepath: String,
    pub offset: u64,
    pub length: u64,
}

impl ProcessChunkRequest {
    pub fn new(job_id: Uuid, filepath: impl Into<String>, chunk: &Chunk) -> Self {
        Self {
            job_id,
            chunk_id: chunk.chunk_id,
            filepath: filepath.into(),
            offset: chunk.offset,
            length: chunk.length,
        }
    }
}

/// Worker to coordinator: metrics for a processed chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResultRequest {
    pub job_id: Uuid,
    pub worker_id: String,
    pub chunk_id: ChunkId,
    pub metrics: ChunkMetrics,
}

/// Acknowledgement for worker-facing requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub acknowledged: bool,
    /// For submits: whether the result was folded into the aggregate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            acknowledged: true,
            accepted: None,
        }
    }

    pub fn submitted(accepted: bool) -> Self {
        Self {
            acknowledged: true,
            accepted: Some(accepted),
        }
    }
}

/// Job client to coordinator: process a whole file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub filepath: String,
}

/// Error body returned by both services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code identifier
    pub error_code: String,
    pub message: String,
}

fn default_protocol_version() -> u32 {
    crate::PROTOCOL_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_wire_format() {
        let req: HealthRequest =
            serde_json::from_str(r#"{"worker_id":"worker1","status":"healthy"}"#).unwrap();
        assert_eq!(req.status, WorkerStatus::Healthy);

        let json = serde_json::to_string(&HealthRequest {
            worker_id: "worker1".into(),
            status: WorkerStatus::Unhealthy,
        })
        .unwrap();
        assert!(json.contains(r#""status":"unhealthy""#));
    }

    #[test]
    fn test_register_defaults() {
        let req: RegisterRequest = serde_json::from_str(r#"{"worker_id":"w1"}"#).unwrap();
        assert!(req.address.is_none());
        assert_eq!(req.protocol_version, crate::PROTOCOL_VERSION);
    }

    #[test]
    fn test_plain_ack_omits_accepted() {
        let json = serde_json::to_string(&Ack::ok()).unwrap();
        assert_eq!(json, r#"{"acknowledged":true}"#);
    }
}
