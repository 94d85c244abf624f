//! Worker registry
//!
//! Tracks worker registration, heartbeats, and health status.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

/// Worker health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Worker is registered and heartbeating
    Healthy,
    /// Worker missed heartbeats, failed a send, or reported itself unhealthy
    Unhealthy,
}

/// Information about a registered worker
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    /// Externally supplied worker identity
    pub worker_id: String,
    /// Base URL chunk requests are sent to
    pub address: Option<String>,
    /// Current status
    pub status: WorkerStatus,
    /// Last heartbeat or registration
    pub last_heartbeat: Instant,
    /// Wall-clock time of first registration
    pub registered_at: DateTime<Utc>,
    /// Position in registration order
    seq: u64,
}

/// Serializable view of a worker for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub address: Option<String>,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub seconds_since_heartbeat: f64,
}

/// Configuration for the worker registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Silence after which a healthy worker is marked unhealthy
    pub heartbeat_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(crate::DEFAULT_HEARTBEAT_TIMEOUT_SECS),
        }
    }
}

/// Manages worker membership and health
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerRecord>>,
    config: RegistryConfig,
}

impl WorkerRegistry {
    /// Create a new registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a worker, or refresh an existing registration
    ///
    /// Returns true if the worker was not known before.
    pub async fn register(&self, worker_id: &str, address: Option<String>) -> bool {
        let mut workers = self.workers.write().await;
        let next_seq = workers.len() as u64;

        match workers.get_mut(worker_id) {
            Some(worker) => {
                if address.is_some() {
                    worker.address = address;
                }
                worker.status = WorkerStatus::Healthy;
                worker.last_heartbeat = Instant::now();
                info!("Worker {} re-registered", worker_id);
                false
            }
            None => {
                info!(
                    "Registered worker {} at {}",
                    worker_id,
                    address.as_deref().unwrap_or("<no address>")
                );
                workers.insert(
                    worker_id.to_string(),
                    WorkerRecord {
                        worker_id: worker_id.to_string(),
                        address,
                        status: WorkerStatus::Healthy,
                        last_heartbeat: Instant::now(),
                        registered_at: Utc::now(),
                        seq: next_seq,
                    },
                );
                true
            }
        }
    }

    /// Process a health report; returns the status before the report
    pub async fn report_health(&self, worker_id: &str, status: WorkerStatus) -> Result<WorkerStatus> {
        let mut workers = self.workers.write().await;

        let worker = workers.get_mut(worker_id).ok_or_else(|| FleetError::UnknownWorker {
            worker_id: worker_id.to_string(),
        })?;

        let previous = worker.status;
        worker.status = status;
        worker.last_heartbeat = Instant::now();

        if previous != status {
            info!("Worker {} status {:?} -> {:?}", worker_id, previous, status);
        } else {
            debug!("Heartbeat from worker {}", worker_id);
        }
        Ok(previous)
    }

    /// Mark a worker unhealthy; returns true if it was healthy before
    pub async fn mark_unhealthy(&self, worker_id: &str) -> Result<bool> {
        let mut workers = self.workers.write().await;

        let worker = workers.get_mut(worker_id).ok_or_else(|| FleetError::UnknownWorker {
            worker_id: worker_id.to_string(),
        })?;

        if worker.status == WorkerStatus::Healthy {
            worker.status = WorkerStatus::Unhealthy;
            warn!("Worker {} marked unhealthy", worker_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Mark every healthy worker silent for longer than the timeout
    ///
    /// Returns the workers that transitioned, in registration order.
    pub async fn check_liveness(&self) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();

        let mut workers = self.workers.write().await;
        for worker in workers.values_mut() {
            if worker.status != WorkerStatus::Healthy {
                continue;
            }
            let elapsed = now.duration_since(worker.last_heartbeat);
            if elapsed > self.config.heartbeat_timeout {
                warn!(
                    "Worker {} marked unhealthy (no heartbeat for {:?})",
                    worker.worker_id, elapsed
                );
                worker.status = WorkerStatus::Unhealthy;
                expired.push((worker.seq, worker.worker_id.clone()));
            }
        }

        expired.sort();
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Currently healthy workers, in registration order
    pub async fn healthy_workers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        let mut healthy: Vec<&WorkerRecord> = workers
            .values()
            .filter(|w| w.status == WorkerStatus::Healthy)
            .collect();
        healthy.sort_by_key(|w| w.seq);
        healthy.into_iter().map(|w| w.worker_id.clone()).collect()
    }

    /// Number of healthy workers
    pub async fn healthy_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| w.status == WorkerStatus::Healthy)
            .count()
    }

    /// Status of a worker, `None` if never registered
    pub async fn status(&self, worker_id: &str) -> Option<WorkerStatus> {
        self.workers.read().await.get(worker_id).map(|w| w.status)
    }

    /// Address chunk requests for this worker go to
    pub async fn address(&self, worker_id: &str) -> Result<String> {
        let workers = self.workers.read().await;
        let worker = workers.get(worker_id).ok_or_else(|| FleetError::UnknownWorker {
            worker_id: worker_id.to_string(),
        })?;
        worker.address.clone().ok_or_else(|| FleetError::InvalidMessage {
            reason: format!("worker {} registered without an address", worker_id),
        })
    }

    /// All workers, in registration order
    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let now = Instant::now();
        let workers = self.workers.read().await;
        let mut records: Vec<&WorkerRecord> = workers.values().collect();
        records.sort_by_key(|w| w.seq);
        records
            .into_iter()
            .map(|w| WorkerSnapshot {
                worker_id: w.worker_id.clone(),
                address: w.address.clone(),
                status: w.status,
                registered_at: w.registered_at,
                seconds_since_heartbeat: now.duration_since(w.last_heartbeat).as_secs_f64(),
            })
            .collect()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(timeout_secs: u64) -> WorkerRegistry {
        WorkerRegistry::new(RegistryConfig {
            heartbeat_timeout: Duration::from_secs(timeout_secs),
        })
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = registry(10);
        assert!(registry.register("w1", Some("http://a".into())).await);
        assert!(!registry.register("w1", None).await);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].address.as_deref(), Some("http://a"));
    }

    #[tokio::test]
    async fn test_reregistration_recovers_worker() {
        let registry = registry(10);
        registry.register("w1", None).await;
        assert!(registry.mark_unhealthy("w1").await.unwrap());
        assert!(registry.healthy_workers().await.is_empty());

        registry.register("w1", None).await;
        assert_eq!(registry.healthy_workers().await, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_worker_health() {
        let registry = registry(10);
        let err = registry
            .report_health("ghost", WorkerStatus::Healthy)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UnknownWorker { .. }));
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_healthy_workers_in_registration_order() {
        let registry = registry(10);
        for id in ["w3", "w1", "w2"] {
            registry.register(id, None).await;
        }
        registry
            .report_health("w1", WorkerStatus::Unhealthy)
            .await
            .unwrap();

        assert_eq!(registry.healthy_workers().await, vec!["w3", "w2"]);
        assert_eq!(registry.healthy_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_timeout() {
        let registry = registry(3);
        registry.register("w1", None).await;
        registry.register("w2", None).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        registry.report_health("w2", WorkerStatus::Healthy).await.unwrap();
        assert!(registry.check_liveness().await.is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(registry.check_liveness().await, vec!["w1".to_string()]);
        // Already unhealthy workers are not reported twice
        assert!(registry.check_liveness().await.is_empty());
        assert_eq!(registry.status("w1").await, Some(WorkerStatus::Unhealthy));
        assert_eq!(registry.status("w2").await, Some(WorkerStatus::Healthy));
    }
}
