//! Worker service binary

#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use logfleet_core::worker::{worker_router, ClientConfig, CoordinatorClient, Worker, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "logfleet-worker")]
struct Args {
    /// Address to bind the worker HTTP server.
    #[arg(long, env = "LOGFLEET_WORKER_BIND_ADDR", default_value = "0.0.0.0:8001")]
    bind: SocketAddr,

    /// Worker id reported to the coordinator (random if unset).
    #[arg(long, env = "LOGFLEET_WORKER_ID")]
    id: Option<String>,

    /// Coordinator base URL.
    #[arg(long, env = "LOGFLEET_COORDINATOR", default_value = "http://localhost:8000")]
    coordinator: String,

    /// Base URL the coordinator uses to reach this worker.
    ///
    /// Defaults to http://127.0.0.1:<port of --bind>.
    #[arg(long, env = "LOGFLEET_ADVERTISE_ADDR")]
    advertise: Option<String>,

    /// Interval between heartbeats.
    #[arg(long, env = "LOGFLEET_HEARTBEAT_INTERVAL_MS", default_value_t = 5_000)]
    heartbeat_interval_ms: u64,

    /// Chunks analyzed at the same time (defaults to the CPU count).
    #[arg(long, env = "LOGFLEET_MAX_CONCURRENT_CHUNKS")]
    max_concurrent_chunks: Option<usize>,

    /// How long shutdown waits for in-flight chunks.
    #[arg(long, env = "LOGFLEET_DRAIN_TIMEOUT_MS", default_value_t = 10_000)]
    drain_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    logfleet_core::logging::init_tracing();
    let args = Args::parse();

    let advertise = args
        .advertise
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", args.bind.port()));
    let defaults = WorkerConfig::default();
    let config = WorkerConfig {
        worker_id: args.id.clone().unwrap_or(defaults.worker_id),
        advertise_addr: Some(advertise.clone()),
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms.max(1)),
        max_concurrent_chunks: args
            .max_concurrent_chunks
            .unwrap_or(defaults.max_concurrent_chunks),
    };
    info!("Starting logfleet worker {}", config.worker_id);

    let client = CoordinatorClient::new(ClientConfig {
        coordinator_addr: args.coordinator.clone(),
        ..Default::default()
    })?;
    let worker = Arc::new(Worker::new(config, client));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!("Worker listening on {} (advertised as {})", args.bind, advertise);
    let app = worker_router(worker.clone());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    info!("Connecting to coordinator at {}", args.coordinator);
    worker.register_with_retry().await?;
    let heartbeat = worker.spawn_heartbeat();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    worker
        .shutdown(Duration::from_millis(args.drain_timeout_ms))
        .await;

    heartbeat.await?;
    server.abort();
    Ok(())
}
