//! Result aggregation
//!
//! Folds per-chunk metrics into a job-wide summary. The fold is
//! commutative and associative, so arrival order never matters.

use serde::{Deserialize, Serialize};

use super::planner::Chunk;
use crate::protocol::ChunkMetrics;

/// A chunk that could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChunk {
    pub chunk: Chunk,
    /// Attempts abandoned before giving up
    pub attempts: u32,
    pub reason: String,
}

/// Job-wide summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total_lines: u64,
    pub total_errors: u64,
    pub total_warnings: u64,
    pub total_bytes: u64,
    pub chunks_completed: u64,
    pub chunks_total: u64,
    #[serde(default)]
    pub failed_chunks: Vec<FailedChunk>,
}

impl AggregateResult {
    /// True if every chunk contributed a result
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && self.chunks_completed == self.chunks_total
    }

    /// Fraction of lines flagged as errors
    pub fn error_rate(&self) -> f64 {
        if self.total_lines == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_lines as f64
        }
    }
}

/// Running aggregate for one job
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    result: AggregateResult,
}

impl Aggregator {
    /// Create an aggregator for a job with `chunks_total` chunks
    pub fn new(chunks_total: u64) -> Self {
        Self {
            result: AggregateResult {
                chunks_total,
                ..Default::default()
            },
        }
    }

    /// Fold one accepted chunk result
    ///
    /// Call once per chunk, after the tracker accepted the result.
    pub fn fold(&mut self, metrics: &ChunkMetrics) -> &AggregateResult {
        let r = &mut self.result;
        r.total_lines = r.total_lines.saturating_add(metrics.lines);
        r.total_errors = r.total_errors.saturating_add(metrics.errors);
        r.total_warnings = r.total_warnings.saturating_add(metrics.warnings);
        r.total_bytes = r.total_bytes.saturating_add(metrics.bytes);
        r.chunks_completed += 1;
        &self.result
    }

    /// Current running aggregate
    pub fn current(&self) -> &AggregateResult {
        &self.result
    }

    /// Close the job, attaching the chunks that never completed
    pub fn finish(mut self, failed_chunks: Vec<FailedChunk>) -> AggregateResult {
        self.result.failed_chunks = failed_chunks;
        self.result
    }
}
