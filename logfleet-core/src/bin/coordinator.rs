//! Coordinator service binary

#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use logfleet_core::coordinator::{
    coordinator_router, Coordinator, CoordinatorConfig, DispatchConfig, RegistryConfig,
};

#[derive(Debug, Parser)]
#[command(name = "logfleet-coordinator")]
struct Args {
    /// Address to bind the coordinator HTTP server.
    #[arg(long, env = "LOGFLEET_COORD_BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Chunk size in bytes.
    #[arg(long, env = "LOGFLEET_CHUNK_SIZE", default_value_t = logfleet_core::DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Dispatch attempts per chunk before it is reported as failed.
    #[arg(long, env = "LOGFLEET_MAX_ATTEMPTS", default_value_t = logfleet_core::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Silence after which a worker is marked unhealthy.
    #[arg(long, env = "LOGFLEET_HEARTBEAT_TIMEOUT_MS", default_value_t = 15_000)]
    heartbeat_timeout_ms: u64,

    /// Interval of the liveness check.
    #[arg(long, env = "LOGFLEET_LIVENESS_INTERVAL_MS", default_value_t = 5_000)]
    liveness_interval_ms: u64,

    /// Pending chunks older than this are re-dispatched (0 disables).
    #[arg(long, env = "LOGFLEET_CHUNK_TIMEOUT_MS", default_value_t = 120_000)]
    chunk_timeout_ms: u64,

    /// How long a job waits for a healthy worker before failing its remaining chunks.
    #[arg(long, env = "LOGFLEET_NO_WORKER_TIMEOUT_MS", default_value_t = 60_000)]
    no_worker_timeout_ms: u64,

    /// Timeout for chunk requests sent to workers.
    #[arg(long, env = "LOGFLEET_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    request_timeout_ms: u64,
}

impl Args {
    fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            registry: RegistryConfig {
                heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            },
            dispatch: DispatchConfig {
                max_attempts: self.max_attempts,
            },
            chunk_size: self.chunk_size,
            liveness_interval: Duration::from_millis(self.liveness_interval_ms.max(1)),
            chunk_timeout: (self.chunk_timeout_ms > 0)
                .then(|| Duration::from_millis(self.chunk_timeout_ms)),
            no_worker_timeout: Duration::from_millis(self.no_worker_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logfleet_core::logging::init_tracing();
    let args = Args::parse();
    if args.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be positive");
    }
    if args.max_attempts == 0 {
        anyhow::bail!("--max-attempts must be at least 1");
    }

    info!("Starting logfleet coordinator");
    let coordinator = Arc::new(Coordinator::new(args.config())?);
    let shutdown = coordinator.shutdown_signal();
    let monitor = coordinator.spawn_liveness_monitor();

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!("Coordinator listening on {}", args.bind);

    let app = coordinator_router(coordinator.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down");
            }
            shutdown.shutdown();
        })
        .await?;

    monitor.await?;
    Ok(())
}
