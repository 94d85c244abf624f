//! Job-level tests for worker failure and recovery
//!
//! Workers are simulated by a pump task reading chunk requests from an
//! in-memory transport and answering through `Coordinator::submit_result`.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use logfleet_core::coordinator::{
    ChunkTransport, Coordinator, CoordinatorConfig, DispatchConfig, WorkerStatus,
};
use logfleet_core::protocol::{ChunkMetrics, ProcessChunkRequest, SubmitResultRequest};
use logfleet_core::worker::{analyze_chunk, count_lines};
use logfleet_core::{FleetError, Result};

type Sent = (String, ProcessChunkRequest);

struct ChannelTransport {
    tx: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl ChunkTransport for ChannelTransport {
    async fn send_chunk(&self, worker_id: &str, address: &str, request: &ProcessChunkRequest) -> Result<()> {
        self.tx
            .send((worker_id.to_string(), request.clone()))
            .map_err(|_| FleetError::ConnectionFailed {
                endpoint: address.to_string(),
                reason: "pump stopped".into(),
            })
    }
}

/// What a simulated worker does with a chunk request
#[derive(Debug, Clone, Copy, PartialEq)]
enum Behavior {
    Reply,
    ReplyTwice,
    /// Answer as a worker that could not read the range
    ReplyEmpty,
    Swallow,
    GoUnhealthy,
}

fn log_contents() -> String {
    let mut contents = String::new();
    for i in 0..60 {
        let level = match i % 7 {
            0 => "ERROR",
            3 => "WARNING",
            _ => "INFO",
        };
        contents.push_str(&format!("2024-01-01T00:00:{:02} {} request {} handled\n", i, level, i));
    }
    contents
}

fn log_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn config(chunk_size: u64, max_attempts: u32) -> CoordinatorConfig {
    CoordinatorConfig {
        dispatch: DispatchConfig { max_attempts },
        chunk_size,
        liveness_interval: Duration::from_millis(20),
        chunk_timeout: Some(Duration::from_millis(150)),
        no_worker_timeout: Duration::from_millis(300),
        ..Default::default()
    }
}

async fn start<F>(config: CoordinatorConfig, workers: &[&str], mut behave: F) -> Arc<Coordinator>
where
    F: FnMut(&str, &ProcessChunkRequest) -> Behavior + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Sent>();
    let coordinator = Arc::new(Coordinator::with_transport(
        config,
        Arc::new(ChannelTransport { tx }),
    ));
    for id in workers {
        coordinator.register(id, Some(format!("mem://{}", id))).await.unwrap();
    }

    let pump = coordinator.clone();
    tokio::spawn(async move {
        while let Some((worker_id, request)) = rx.recv().await {
            let behavior = behave(&worker_id, &request);
            let coordinator = pump.clone();
            tokio::spawn(async move {
                match behavior {
                    Behavior::Swallow => {}
                    Behavior::GoUnhealthy => {
                        coordinator
                            .report_health(&worker_id, WorkerStatus::Unhealthy)
                            .await
                            .unwrap();
                    }
                    Behavior::Reply | Behavior::ReplyTwice | Behavior::ReplyEmpty => {
                        let metrics = if behavior == Behavior::ReplyEmpty {
                            ChunkMetrics::default()
                        } else {
                            analyze_chunk(&request.filepath, request.offset, request.length).await
                        };
                        let submit = SubmitResultRequest {
                            job_id: request.job_id,
                            worker_id,
                            chunk_id: request.chunk_id,
                            metrics,
                        };
                        coordinator.submit_result(&submit);
                        if behavior == Behavior::ReplyTwice {
                            coordinator.submit_result(&submit);
                        }
                    }
                }
            });
        }
    });
    coordinator
}

fn chunk_size_for(contents: &str, chunks: u64) -> u64 {
    (contents.len() as u64).div_ceil(chunks)
}

#[tokio::test]
async fn test_all_workers_reply() {
    let contents = log_contents();
    let file = log_file(&contents);
    let expected = count_lines(contents.as_bytes());

    let coordinator = start(
        config(chunk_size_for(&contents, 3), 3),
        &["w0", "w1", "w2"],
        |_, _| Behavior::Reply,
    )
    .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();

    assert!(result.is_complete());
    assert_eq!(result.chunks_total, 3);
    assert_eq!(result.chunks_completed, 3);
    assert_eq!(result.total_lines, expected.lines);
    assert_eq!(result.total_errors, expected.errors);
    assert_eq!(result.total_warnings, expected.warnings);
    assert_eq!(result.total_bytes, expected.bytes);
    assert!(coordinator.active_job_id().is_none());
}

#[tokio::test]
async fn test_unhealthy_worker_chunk_reassigned() {
    let contents = log_contents();
    let file = log_file(&contents);
    let expected = count_lines(contents.as_bytes());

    // The worker owning chunk 2 drops out instead of answering
    let coordinator = start(
        config(chunk_size_for(&contents, 3), 3),
        &["w0", "w1", "w2"],
        |worker, _| {
            if worker == "w2" {
                Behavior::GoUnhealthy
            } else {
                Behavior::Reply
            }
        },
    )
    .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.chunks_completed, 3);
    assert!(result.failed_chunks.is_empty());
    assert_eq!(result.total_lines, expected.lines);
    assert_eq!(result.total_errors, expected.errors);
    assert_eq!(
        coordinator.registry().status("w2").await,
        Some(WorkerStatus::Unhealthy)
    );
}

#[tokio::test]
async fn test_silent_chunk_fails_after_max_attempts() {
    let contents = log_contents();
    let file = log_file(&contents);

    // Chunk 1 is never answered, whichever worker gets it
    let coordinator = start(
        config(chunk_size_for(&contents, 3), 2),
        &["w0", "w1"],
        |_, request| {
            if request.chunk_id == 1 {
                Behavior::Swallow
            } else {
                Behavior::Reply
            }
        },
    )
    .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();

    assert!(!result.is_complete());
    assert_eq!(result.chunks_completed, 2);
    assert_eq!(result.failed_chunks.len(), 1);
    assert_eq!(result.failed_chunks[0].chunk.chunk_id, 1);
    assert_eq!(result.failed_chunks[0].attempts, 2);
    assert!(result.total_lines > 0);
}

#[tokio::test]
async fn test_duplicate_results_counted_once() {
    let contents = log_contents();
    let file = log_file(&contents);
    let expected = count_lines(contents.as_bytes());

    let coordinator = start(
        config(chunk_size_for(&contents, 4), 3),
        &["w0", "w1"],
        |_, _| Behavior::ReplyTwice,
    )
    .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.chunks_completed, 4);
    assert_eq!(result.total_lines, expected.lines);
    assert_eq!(result.total_bytes, expected.bytes);
}

#[tokio::test]
async fn test_unreadable_chunk_counts_zero() {
    let contents = log_contents();
    let file = log_file(&contents);
    let chunk_size = chunk_size_for(&contents, 3);

    let coordinator = start(config(chunk_size, 3), &["w0", "w1"], |_, request| {
        if request.chunk_id == 0 {
            Behavior::ReplyEmpty
        } else {
            Behavior::Reply
        }
    })
    .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();

    // Chunks 1 and 2 own every line starting at or after byte chunk_size
    let tail_start = contents.as_bytes()[chunk_size as usize - 1..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|idx| chunk_size as usize + idx)
        .unwrap();
    let expected = count_lines(&contents.as_bytes()[tail_start..]);

    assert!(result.is_complete());
    assert_eq!(result.chunks_completed, 3);
    assert_eq!(result.total_lines, expected.lines);
    assert_eq!(result.total_errors, expected.errors);
    assert_eq!(result.total_warnings, expected.warnings);
}

#[tokio::test]
async fn test_no_workers_returns_partial_result() {
    let contents = log_contents();
    let file = log_file(&contents);

    let coordinator = start(config(chunk_size_for(&contents, 3), 3), &[], |_, _| {
        Behavior::Reply
    })
    .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.chunks_completed, 0);
    assert_eq!(result.failed_chunks.len(), 3);
    assert_eq!(result.total_lines, 0);
}

#[tokio::test]
async fn test_late_worker_picks_up_waiting_job() {
    let contents = log_contents();
    let file = log_file(&contents);
    let expected = count_lines(contents.as_bytes());

    let mut cfg = config(chunk_size_for(&contents, 3), 3);
    cfg.no_worker_timeout = Duration::from_secs(5);
    let coordinator = start(cfg, &[], |_, _| Behavior::Reply).await;

    let late = coordinator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        late.register("w0", Some("mem://w0".into())).await.unwrap();
    });

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.process(file.path()))
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_complete());
    assert_eq!(result.total_lines, expected.lines);
}

#[tokio::test]
async fn test_second_job_rejected_while_running() {
    let contents = log_contents();
    let file = log_file(&contents);

    let mut cfg = config(chunk_size_for(&contents, 2), 3);
    cfg.chunk_timeout = None;
    let sent = Arc::new(AtomicUsize::new(0));
    let counter = sent.clone();
    let coordinator = start(cfg, &["w0"], move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Behavior::Swallow
    })
    .await;

    let running = coordinator.clone();
    let path = file.path().to_path_buf();
    let first = tokio::spawn(async move { running.process(path).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while sent.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let err = coordinator.process(file.path()).await.unwrap_err();
    assert!(matches!(err, FleetError::JobInProgress));

    // Answer the swallowed chunks by hand so the first job can finish
    let job_id = coordinator.active_job_id().unwrap();
    for chunk_id in 0..2 {
        coordinator.submit_result(&SubmitResultRequest {
            job_id,
            worker_id: "w0".into(),
            chunk_id,
            metrics: ChunkMetrics {
                lines: 1,
                ..Default::default()
            },
        });
    }
    let result = first.await.unwrap().unwrap();
    assert_eq!(result.chunks_completed, 2);
    assert_eq!(result.total_lines, 2);
}
