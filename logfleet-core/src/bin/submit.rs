//! Job submission binary
//!
//! Asks the coordinator to process a file and prints the aggregate as JSON.

#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use logfleet_core::worker::{ClientConfig, CoordinatorClient};

#[derive(Debug, Parser)]
#[command(name = "logfleet-submit")]
struct Args {
    /// Log file to process, as seen by the coordinator and workers.
    file: PathBuf,

    /// Coordinator base URL.
    #[arg(long, env = "LOGFLEET_COORDINATOR", default_value = "http://localhost:8000")]
    coordinator: String,

    /// How long to wait for the job to finish.
    #[arg(long, env = "LOGFLEET_JOB_TIMEOUT_SECS", default_value_t = 3600)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    logfleet_core::logging::init_tracing();
    let args = Args::parse();

    let client = CoordinatorClient::new(ClientConfig {
        coordinator_addr: args.coordinator.clone(),
        job_timeout: Duration::from_secs(args.timeout_secs),
        ..Default::default()
    })?;

    let filepath = args.file.display().to_string();
    let result = client
        .submit_job(&filepath)
        .await
        .with_context(|| format!("processing {}", filepath))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_complete() {
        anyhow::bail!(
            "{} of {} chunks could not be processed",
            result.failed_chunks.len(),
            result.chunks_total
        );
    }
    Ok(())
}
