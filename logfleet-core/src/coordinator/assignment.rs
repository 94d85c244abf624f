//! Assignment tracking
//!
//! Maps every chunk of a job to the worker it was sent to and its
//! completion state. At most one assignment per chunk is pending at a time.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::aggregator::FailedChunk;
use super::planner::{Chunk, ChunkId};
use crate::error::{FleetError, Result};

/// State of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentState {
    /// Sent to a worker, result outstanding
    Pending,
    /// Result accepted
    Completed,
}

/// A chunk handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub chunk: Chunk,
    pub worker_id: String,
    pub state: AssignmentState,
    /// Number of earlier assignments of this chunk that were abandoned
    pub attempt: u32,
}

/// A chunk waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatchable {
    pub chunk: Chunk,
    pub attempt: u32,
    /// Worker that last held the chunk, if any
    pub previous_worker: Option<String>,
}

#[derive(Debug, Clone)]
enum Slot {
    Unassigned,
    Pending { worker_id: String, since: Instant },
    Completed { worker_id: String },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
struct ChunkEntry {
    chunk: Chunk,
    slot: Slot,
    attempt: u32,
    previous_worker: Option<String>,
}

impl ChunkEntry {
    /// Drop the pending assignment and count the abandoned attempt
    fn release(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.slot, Slot::Unassigned) {
            Slot::Pending { worker_id, .. } => {
                self.attempt += 1;
                self.previous_worker = Some(worker_id.clone());
                Some(worker_id)
            }
            other => {
                self.slot = other;
                None
            }
        }
    }
}

/// Tracks assignments for every chunk of one job
#[derive(Debug, Clone)]
pub struct AssignmentTracker {
    entries: BTreeMap<ChunkId, ChunkEntry>,
}

impl AssignmentTracker {
    /// Create a tracker with every chunk unassigned
    pub fn new(chunks: &[Chunk]) -> Self {
        let entries = chunks
            .iter()
            .map(|chunk| {
                (
                    chunk.chunk_id,
                    ChunkEntry {
                        chunk: *chunk,
                        slot: Slot::Unassigned,
                        attempt: 0,
                        previous_worker: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Create a pending assignment of a chunk to a worker
    pub fn assign(&mut self, chunk_id: ChunkId, worker_id: &str) -> Result<Assignment> {
        let entry = self
            .entries
            .get_mut(&chunk_id)
            .ok_or(FleetError::UnknownChunk { chunk_id })?;

        match &entry.slot {
            Slot::Pending { worker_id: owner, .. } => {
                return Err(FleetError::DuplicatePendingAssignment {
                    chunk_id,
                    owner: owner.clone(),
                })
            }
            Slot::Completed { .. } | Slot::Failed { .. } => {
                return Err(FleetError::ChunkResolved { chunk_id })
            }
            Slot::Unassigned => {}
        }

        entry.slot = Slot::Pending {
            worker_id: worker_id.to_string(),
            since: Instant::now(),
        };
        debug!(
            "Chunk {} assigned to {} (attempt {})",
            chunk_id, worker_id, entry.attempt
        );

        Ok(Assignment {
            chunk: entry.chunk,
            worker_id: worker_id.to_string(),
            state: AssignmentState::Pending,
            attempt: entry.attempt,
        })
    }

    /// Mark a chunk completed if the report comes from its pending owner
    ///
    /// Returns false for duplicate, late or foreign reports; only a true
    /// return may be folded into the aggregate.
    pub fn complete(&mut self, chunk_id: ChunkId, worker_id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(&chunk_id) else {
            return false;
        };

        match &entry.slot {
            Slot::Pending { worker_id: owner, .. } if owner == worker_id => {
                entry.slot = Slot::Completed {
                    worker_id: worker_id.to_string(),
                };
                true
            }
            _ => {
                debug!(
                    "Discarding result for chunk {} from {} (not the pending owner)",
                    chunk_id, worker_id
                );
                false
            }
        }
    }

    /// Release every chunk pending on a worker, in chunk-id order
    pub fn reassign_worker(&mut self, worker_id: &str) -> Vec<Chunk> {
        let mut released = Vec::new();
        for entry in self.entries.values_mut() {
            let owned = matches!(&entry.slot, Slot::Pending { worker_id: owner, .. } if owner == worker_id);
            if owned {
                entry.release();
                released.push(entry.chunk);
            }
        }
        if !released.is_empty() {
            warn!(
                "Released {} pending chunks from worker {}",
                released.len(),
                worker_id
            );
        }
        released
    }

    /// Release pending chunks whose result is overdue
    ///
    /// Returns each released chunk with the worker that held it.
    pub fn release_expired(&mut self, timeout: Duration) -> Vec<(Chunk, String)> {
        let now = Instant::now();
        let mut released = Vec::new();
        for entry in self.entries.values_mut() {
            let overdue = matches!(&entry.slot, Slot::Pending { since, .. } if now.duration_since(*since) > timeout);
            if overdue {
                if let Some(worker_id) = entry.release() {
                    warn!(
                        "Chunk {} timed out on worker {}",
                        entry.chunk.chunk_id, worker_id
                    );
                    released.push((entry.chunk, worker_id));
                }
            }
        }
        released
    }

    /// Unassigned chunks ready to be sent, in chunk-id order
    ///
    /// Chunks that already used `max_attempts` attempts are marked
    /// permanently failed instead of being returned.
    pub fn take_dispatchable(&mut self, max_attempts: u32) -> Vec<Dispatchable> {
        let mut ready = Vec::new();
        for entry in self.entries.values_mut() {
            if !matches!(entry.slot, Slot::Unassigned) {
                continue;
            }
            if entry.attempt >= max_attempts {
                warn!(
                    "Chunk {} failed permanently after {} attempts",
                    entry.chunk.chunk_id, entry.attempt
                );
                entry.slot = Slot::Failed {
                    reason: FleetError::ChunkPermanentlyFailed {
                        chunk_id: entry.chunk.chunk_id,
                        attempts: entry.attempt,
                    }
                    .to_string(),
                };
                continue;
            }
            ready.push(Dispatchable {
                chunk: entry.chunk,
                attempt: entry.attempt,
                previous_worker: entry.previous_worker.clone(),
            });
        }
        ready
    }

    /// Mark every chunk not yet completed as permanently failed
    pub fn fail_unresolved(&mut self, reason: &str) -> Vec<Chunk> {
        let mut failed = Vec::new();
        for entry in self.entries.values_mut() {
            if matches!(entry.slot, Slot::Unassigned | Slot::Pending { .. }) {
                entry.slot = Slot::Failed {
                    reason: reason.to_string(),
                };
                failed.push(entry.chunk);
            }
        }
        failed
    }

    /// Current assignment of a chunk, if it is pending or completed
    pub fn assignment(&self, chunk_id: ChunkId) -> Option<Assignment> {
        let entry = self.entries.get(&chunk_id)?;
        let (worker_id, state) = match &entry.slot {
            Slot::Pending { worker_id, .. } => (worker_id.clone(), AssignmentState::Pending),
            Slot::Completed { worker_id } => (worker_id.clone(), AssignmentState::Completed),
            Slot::Unassigned | Slot::Failed { .. } => return None,
        };
        Some(Assignment {
            chunk: entry.chunk,
            worker_id,
            state,
            attempt: entry.attempt,
        })
    }

    /// Chunks pending on a worker, in chunk-id order
    pub fn pending_on(&self, worker_id: &str) -> Vec<ChunkId> {
        self.entries
            .values()
            .filter(|e| matches!(&e.slot, Slot::Pending { worker_id: owner, .. } if owner == worker_id))
            .map(|e| e.chunk.chunk_id)
            .collect()
    }

    /// Permanently failed chunks, in chunk-id order
    pub fn failed_chunks(&self) -> Vec<FailedChunk> {
        self.entries
            .values()
            .filter_map(|e| match &e.slot {
                Slot::Failed { reason } => Some(FailedChunk {
                    chunk: e.chunk,
                    attempts: e.attempt,
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Total number of chunks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the job has no chunks
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Pending { .. }))
    }

    pub fn completed_count(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Completed { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Failed { .. }))
    }

    pub fn unassigned_count(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Unassigned))
    }

    /// True once every chunk is completed or permanently failed
    pub fn is_resolved(&self) -> bool {
        self.entries
            .values()
            .all(|e| matches!(e.slot, Slot::Completed { .. } | Slot::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&Slot) -> bool) -> usize {
        self.entries.values().filter(|e| pred(&e.slot)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::planner::plan;

    fn tracker(n: u64) -> AssignmentTracker {
        AssignmentTracker::new(&plan(n * 10, 10).unwrap())
    }

    #[test]
    fn test_assign_rejects_double_dispatch() {
        let mut t = tracker(2);
        t.assign(0, "w1").unwrap();
        let err = t.assign(0, "w2").unwrap_err();
        assert!(matches!(
            err,
            FleetError::DuplicatePendingAssignment { chunk_id: 0, ref owner } if owner == "w1"
        ));
        assert!(matches!(t.assign(9, "w1"), Err(FleetError::UnknownChunk { chunk_id: 9 })));
    }

    #[test]
    fn test_complete_only_from_owner_once() {
        let mut t = tracker(1);
        t.assign(0, "w1").unwrap();

        assert!(!t.complete(0, "w2"));
        assert!(t.complete(0, "w1"));
        assert!(!t.complete(0, "w1"));
        assert_eq!(t.completed_count(), 1);
        assert!(t.is_resolved());
        assert!(matches!(t.assign(0, "w2"), Err(FleetError::ChunkResolved { .. })));
    }

    #[test]
    fn test_reassign_worker_returns_owned_chunks_in_order() {
        let mut t = tracker(6);
        for (chunk, worker) in [(4, "w1"), (0, "w1"), (1, "w2"), (2, "w1"), (5, "w2")] {
            t.assign(chunk, worker).unwrap();
        }
        t.complete(2, "w1");

        let released: Vec<ChunkId> = t.reassign_worker("w1").iter().map(|c| c.chunk_id).collect();
        assert_eq!(released, vec![0, 4]);
        assert_eq!(t.pending_on("w2"), vec![1, 5]);
        assert!(t.pending_on("w1").is_empty());

        // Released chunks can be dispatched again with a bumped attempt
        let ready = t.take_dispatchable(3);
        let ids: Vec<ChunkId> = ready.iter().map(|d| d.chunk.chunk_id).collect();
        assert_eq!(ids, vec![0, 3, 4]);
        assert_eq!(ready[0].attempt, 1);
        assert_eq!(ready[0].previous_worker.as_deref(), Some("w1"));
        assert_eq!(ready[1].attempt, 0);
    }

    #[test]
    fn test_stale_owner_cannot_complete_after_reassign() {
        let mut t = tracker(1);
        t.assign(0, "w1").unwrap();
        t.reassign_worker("w1");
        t.assign(0, "w2").unwrap();

        assert!(!t.complete(0, "w1"));
        assert!(t.complete(0, "w2"));
        assert_eq!(t.assignment(0).unwrap().attempt, 1);
    }

    #[test]
    fn test_attempts_exhausted() {
        let mut t = tracker(1);
        for worker in ["w1", "w2"] {
            assert_eq!(t.take_dispatchable(2).len(), 1);
            t.assign(0, worker).unwrap();
            t.reassign_worker(worker);
        }
        assert!(t.take_dispatchable(2).is_empty());

        let failed = t.failed_chunks();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 2);
        assert!(t.is_resolved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_expired() {
        let mut t = tracker(2);
        t.assign(0, "w1").unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        t.assign(1, "w2").unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;

        let released = t.release_expired(Duration::from_secs(6));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0.chunk_id, 0);
        assert_eq!(released[0].1, "w1");
        assert_eq!(t.pending_on("w2"), vec![1]);
    }

    #[test]
    fn test_fail_unresolved() {
        let mut t = tracker(3);
        t.assign(0, "w1").unwrap();
        t.assign(1, "w1").unwrap();
        t.complete(1, "w1");

        let failed = t.fail_unresolved("no healthy workers");
        assert_eq!(failed.len(), 2);
        assert!(t.is_resolved());
        assert_eq!(t.failed_chunks()[0].reason, "no healthy workers");
    }
}
