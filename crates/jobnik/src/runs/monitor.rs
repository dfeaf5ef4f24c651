use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{FailurePolicy, MonitorConfig},
    kubernetes::{has_failed_terminally, has_succeeded, ClusterApi},
    metrics,
};

/// Where a run's monitor currently stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MonitorState {
    /// Polling the run's status.
    Watching,
    /// Terminal outcome observed; waiting before deletion.
    GracePeriod,
    /// The run was deleted.
    Deleted,
    /// Deletion was attempted and failed; the run is still in the cluster.
    DeleteFailed,
    /// The run failed and is kept for inspection.
    Retained,
    /// The run disappeared before the monitor acted on it.
    Vanished,
    /// The monitor was stopped before reaching an outcome.
    Cancelled,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorState::Watching | MonitorState::GracePeriod)
    }
}

/// Watches one run until it succeeds, then deletes it after the grace period.
pub struct LifecycleMonitor {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    name: String,
    config: MonitorConfig,
}

impl LifecycleMonitor {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        namespace: &str,
        name: &str,
        config: MonitorConfig,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            name: name.to_string(),
            config,
        }
    }

    /// Drive the run to a terminal state, publishing every transition on `state`.
    pub async fn run(
        self,
        cancel: CancellationToken,
        state: watch::Sender<MonitorState>,
    ) -> MonitorState {
        let guard = ActiveGuard::new(state);
        info!("Monitoring job {}/{}", self.namespace, self.name);

        let outcome = self.watch(&cancel, &guard.state).await;

        let _ = guard.state.send(outcome);
        info!(
            "Stopped monitoring job {}/{}: {:?}",
            self.namespace, self.name, outcome
        );
        outcome
    }

    async fn watch(
        &self,
        cancel: &CancellationToken,
        state: &watch::Sender<MonitorState>,
    ) -> MonitorState {
        loop {
            if !sleep_unless_cancelled(self.config.poll_interval, cancel).await {
                return MonitorState::Cancelled;
            }

            let job = match self.cluster.get_job(&self.namespace, &self.name).await {
                Ok(job) => job,
                Err(e) if e.is_not_found() => {
                    info!(
                        "Job {}/{} no longer exists, nothing to clean up",
                        self.namespace, self.name
                    );
                    return MonitorState::Vanished;
                }
                Err(e) => {
                    warn!("Error retrieving job {}/{}: {}", self.namespace, self.name, e);
                    continue;
                }
            };

            if has_succeeded(&job) {
                info!("Job {}/{} completed successfully", self.namespace, self.name);
                return self.delete_after_grace(cancel, state).await;
            }

            if has_failed_terminally(&job) {
                match self.config.on_failure {
                    FailurePolicy::Retain => {
                        warn!(
                            "Job {}/{} failed; retaining it for inspection",
                            self.namespace, self.name
                        );
                        return MonitorState::Retained;
                    }
                    FailurePolicy::Delete => {
                        warn!("Job {}/{} failed; scheduling cleanup", self.namespace, self.name);
                        return self.delete_after_grace(cancel, state).await;
                    }
                }
            }

            debug!("Job {}/{} still in progress", self.namespace, self.name);
        }
    }

    async fn delete_after_grace(
        &self,
        cancel: &CancellationToken,
        state: &watch::Sender<MonitorState>,
    ) -> MonitorState {
        let _ = state.send(MonitorState::GracePeriod);
        if !sleep_unless_cancelled(self.config.grace_period, cancel).await {
            return MonitorState::Cancelled;
        }

        match self.cluster.delete_job(&self.namespace, &self.name).await {
            Ok(()) => {
                metrics::RUNS_DELETED_TOTAL.inc();
                info!("Job {}/{} deleted", self.namespace, self.name);
                MonitorState::Deleted
            }
            Err(e) => {
                error!("Error deleting job {}/{}: {}", self.namespace, self.name, e);
                MonitorState::DeleteFailed
            }
        }
    }
}

/// Counts the monitor in `jobnik_monitors_active` while it lives. Dropped
/// before an outcome was published (the task was aborted), it publishes
/// `Cancelled`.
struct ActiveGuard {
    state: watch::Sender<MonitorState>,
}

impl ActiveGuard {
    fn new(state: watch::Sender<MonitorState>) -> Self {
        metrics::MONITORS_ACTIVE.inc();
        Self { state }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        metrics::MONITORS_ACTIVE.dec();
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = MonitorState::Cancelled;
            true
        });
    }
}

/// Returns false if `cancel` fired before `duration` elapsed.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
