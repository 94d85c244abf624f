use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `LOGFLEET_LOG` first, then `RUST_LOG`, then a default.
///
/// Events about a job carry its `job_id`; chunk events carry `chunk_id` and `worker_id`.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("LOGFLEET_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
