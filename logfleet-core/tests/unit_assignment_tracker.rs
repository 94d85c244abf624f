//! Unit tests for assignment tracking
//!
//! Tests the chunk lifecycle, reassignment and bounded attempts.

use logfleet_core::coordinator::{plan, AssignmentState, AssignmentTracker};
use logfleet_core::FleetError;

fn tracker(chunks: u64) -> AssignmentTracker {
    AssignmentTracker::new(&plan(chunks * 10, 10).unwrap())
}

#[test]
fn test_lifecycle() {
    let mut t = tracker(3);
    assert_eq!(t.unassigned_count(), 3);

    for ready in t.take_dispatchable(3) {
        t.assign(ready.chunk.chunk_id, "w0").unwrap();
    }
    assert_eq!(t.pending_count(), 3);

    assert!(t.complete(0, "w0"));
    assert!(t.complete(1, "w0"));
    assert!(t.complete(2, "w0"));
    assert!(t.is_resolved());
    assert_eq!(t.assignment(1).unwrap().state, AssignmentState::Completed);
}

#[test]
fn test_second_pending_assignment_rejected() {
    let mut t = tracker(1);
    t.assign(0, "w0").unwrap();

    let err = t.assign(0, "w1").unwrap_err();
    assert!(matches!(err, FleetError::DuplicatePendingAssignment { chunk_id: 0, .. }));
    assert_eq!(t.pending_on("w1"), Vec::<u64>::new());
}

#[test]
fn test_completed_chunk_not_reassigned() {
    let mut t = tracker(2);
    t.assign(0, "w0").unwrap();
    t.assign(1, "w0").unwrap();
    assert!(t.complete(0, "w0"));

    let released = t.reassign_worker("w0");
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].chunk_id, 1);
    assert_eq!(t.assignment(0).unwrap().state, AssignmentState::Completed);
}

#[test]
fn test_duplicate_and_foreign_results_rejected() {
    let mut t = tracker(1);
    t.assign(0, "w0").unwrap();

    assert!(!t.complete(0, "w1"), "only the pending owner may complete");
    assert!(t.complete(0, "w0"));
    assert!(!t.complete(0, "w0"), "second result for a chunk is a no-op");
    assert!(!t.complete(7, "w0"), "unknown chunk");
}

#[test]
fn test_late_result_from_previous_owner_discarded() {
    let mut t = tracker(1);
    t.assign(0, "w0").unwrap();
    t.reassign_worker("w0");
    t.assign(0, "w1").unwrap();

    assert!(!t.complete(0, "w0"));
    assert!(t.complete(0, "w1"));
}

#[test]
fn test_attempts_bounded() {
    let mut t = tracker(1);
    for worker in ["w0", "w1"] {
        let ready = t.take_dispatchable(2);
        assert_eq!(ready.len(), 1);
        t.assign(0, worker).unwrap();
        t.reassign_worker(worker);
    }

    assert!(t.take_dispatchable(2).is_empty());
    assert!(t.is_resolved());
    let failed = t.failed_chunks();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 2);
}

#[test]
fn test_previous_owner_reported() {
    let mut t = tracker(1);
    t.assign(0, "w0").unwrap();
    t.reassign_worker("w0");

    let ready = t.take_dispatchable(3);
    assert_eq!(ready[0].previous_worker.as_deref(), Some("w0"));
    assert_eq!(ready[0].attempt, 1);
}

#[test]
fn test_fail_unresolved_keeps_completed() {
    let mut t = tracker(3);
    t.assign(0, "w0").unwrap();
    t.assign(1, "w0").unwrap();
    assert!(t.complete(0, "w0"));

    let failed = t.fail_unresolved("no healthy workers");
    assert_eq!(failed.len(), 2);
    assert_eq!(t.completed_count(), 1);
    assert!(t.is_resolved());
    assert_eq!(t.failed_chunks()[0].reason, "no healthy workers");
}
