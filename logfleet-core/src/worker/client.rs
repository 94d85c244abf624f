//! Coordinator client
//!
//! HTTP client wrapper for worker-coordinator and job-client communication.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::coordinator::aggregator::AggregateResult;
use crate::coordinator::membership::WorkerStatus;
use crate::error::{FleetError, Result};
use crate::protocol::{
    Ack, ErrorResponse, HealthRequest, JobRequest, RegisterRequest, SubmitResultRequest,
    HEALTH_PATH, JOBS_PATH, REGISTER_PATH, SUBMIT_PATH,
};

/// Configuration for coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator base URL
    pub coordinator_addr: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout for worker-facing calls
    pub request_timeout: Duration,
    /// Request timeout for a whole job submission
    pub job_timeout: Duration,
    /// Extra attempts for a result submission
    pub submit_retries: u32,
    /// Delay before the first retry, doubled after each one
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "http://localhost:8000".into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(3600),
            submit_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Coordinator client
pub struct CoordinatorClient {
    config: ClientConfig,
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FleetError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.coordinator_addr.trim_end_matches('/'), path)
    }

    /// POST a JSON body and decode the JSON reply
    async fn post<B, R>(&self, path: &str, body: &B, timeout: Option<Duration>) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        let mut request = self.client.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let resp = request.send().await.map_err(|e| FleetError::ConnectionFailed {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<R>().await.map_err(|e| FleetError::InvalidMessage {
                reason: format!("Bad response from {}: {}", url, e),
            });
        }

        let error = resp.json::<ErrorResponse>().await.ok();
        Err(decode_error(status, error))
    }

    /// Register with coordinator
    pub async fn register(&self, worker_id: &str, address: Option<String>) -> Result<Ack> {
        let req = RegisterRequest {
            worker_id: worker_id.to_string(),
            address,
            protocol_version: crate::PROTOCOL_VERSION,
        };
        let ack = self.post(REGISTER_PATH, &req, None).await?;
        info!("Registered as {} with {}", worker_id, self.config.coordinator_addr);
        Ok(ack)
    }

    /// Send heartbeat or health transition
    pub async fn send_heartbeat(&self, worker_id: &str, status: WorkerStatus) -> Result<Ack> {
        let req = HealthRequest {
            worker_id: worker_id.to_string(),
            status,
        };
        self.post(HEALTH_PATH, &req, None).await
    }

    /// Submit chunk metrics, retrying transient failures with backoff
    ///
    /// Resubmitting is safe: the coordinator folds a chunk at most once.
    pub async fn submit_result(&self, req: &SubmitResultRequest) -> Result<Ack> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0;

        loop {
            match self.post::<_, Ack>(SUBMIT_PATH, req, None).await {
                Ok(ack) => {
                    if ack.accepted == Some(false) {
                        debug!(
                            "Result for chunk {} of job {} was not needed",
                            req.chunk_id, req.job_id
                        );
                    }
                    return Ok(ack);
                }
                Err(e) if e.is_retryable() && attempt < self.config.submit_retries => {
                    attempt += 1;
                    warn!(
                        "Submitting chunk {} failed (attempt {}): {}",
                        req.chunk_id, attempt, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run a job and wait for its aggregate result
    pub async fn submit_job(&self, filepath: &str) -> Result<AggregateResult> {
        let req = JobRequest {
            filepath: filepath.to_string(),
        };
        self.post(JOBS_PATH, &req, Some(self.config.job_timeout)).await
    }
}

/// Map an error reply back onto the error the server raised
fn decode_error(status: StatusCode, body: Option<ErrorResponse>) -> FleetError {
    let Some(ErrorResponse { error }) = body else {
        return FleetError::Internal {
            message: format!("Coordinator returned status {}", status),
        };
    };

    match error.error_code.as_str() {
        "UNKNOWN_WORKER" => FleetError::UnknownWorker {
            worker_id: error.message,
        },
        "JOB_IN_PROGRESS" => FleetError::JobInProgress,
        "NO_HEALTHY_WORKERS" => FleetError::NoHealthyWorkers,
        "SHUTDOWN_IN_PROGRESS" => FleetError::ShutdownInProgress,
        "FILE_UNREADABLE" => FleetError::FileUnreadable {
            path: String::new(),
            reason: error.message,
        },
        "INVALID_MESSAGE" | "INVALID_CHUNK_SIZE" => FleetError::InvalidMessage {
            reason: error.message,
        },
        _ => FleetError::Internal {
            message: format!("{} ({})", error.message, status),
        },
    }
}
