use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::monitor::{LifecycleMonitor, MonitorState};

/// `namespace/name` of a monitored run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    pub namespace: String,
    pub name: String,
}

impl RunKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Externally visible view of one monitor.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorView {
    pub namespace: String,
    pub job_name: String,
    pub state: MonitorState,
    pub started_at: DateTime<Utc>,
}

struct MonitorEntry {
    cancel: CancellationToken,
    handle: Option<JoinHandle<MonitorState>>,
    state: watch::Receiver<MonitorState>,
    started_at: DateTime<Utc>,
}

impl MonitorEntry {
    fn current(&self) -> MonitorState {
        *self.state.borrow()
    }
}

/// Tracks every in-flight monitor so it can be inspected, cancelled, and
/// drained on shutdown.
pub struct RunRegistry {
    root: CancellationToken,
    monitors: RwLock<HashMap<RunKey, MonitorEntry>>,
    retain_finished: usize,
}

impl RunRegistry {
    pub fn new(retain_finished: usize) -> Self {
        Self {
            root: CancellationToken::new(),
            monitors: RwLock::new(HashMap::new()),
            retain_finished,
        }
    }

    /// Start `monitor` on its own task under `key`.
    pub async fn spawn(&self, key: RunKey, monitor: LifecycleMonitor) {
        let cancel = self.root.child_token();
        let (state_tx, state_rx) = watch::channel(MonitorState::Watching);
        let handle = tokio::spawn(monitor.run(cancel.clone(), state_tx));

        let entry = MonitorEntry {
            cancel,
            handle: Some(handle),
            state: state_rx,
            started_at: Utc::now(),
        };

        let mut monitors = self.monitors.write().await;
        if let Some(previous) = monitors.insert(key.clone(), entry) {
            warn!("Replacing existing monitor for {}", key);
            previous.cancel.cancel();
        }
        self.prune(&mut monitors);
    }

    /// Stop the monitor for `key`. Returns false if there is no running monitor.
    pub async fn cancel(&self, key: &RunKey) -> bool {
        let monitors = self.monitors.read().await;
        match monitors.get(key) {
            Some(entry) if !entry.current().is_terminal() => {
                info!("Cancelling monitor for {}", key);
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn state(&self, key: &RunKey) -> Option<MonitorState> {
        self.monitors.read().await.get(key).map(MonitorEntry::current)
    }

    pub async fn snapshot(&self) -> Vec<MonitorView> {
        let monitors = self.monitors.read().await;
        let mut views: Vec<MonitorView> = monitors
            .iter()
            .map(|(key, entry)| MonitorView {
                namespace: key.namespace.clone(),
                job_name: key.name.clone(),
                state: entry.current(),
                started_at: entry.started_at,
            })
            .collect();
        views.sort_by(|a, b| {
            (a.namespace.as_str(), a.job_name.as_str())
                .cmp(&(b.namespace.as_str(), b.job_name.as_str()))
        });
        views
    }

    /// Number of monitors that have not reached a terminal state.
    pub async fn active(&self) -> usize {
        self.monitors
            .read()
            .await
            .values()
            .filter(|entry| !entry.current().is_terminal())
            .count()
    }

    /// Cancel every monitor and wait up to `drain` for them to stop.
    /// Monitors still running after that are aborted, which publishes
    /// `Cancelled` for them.
    pub async fn shutdown(&self, drain: Duration) {
        self.root.cancel();

        let mut handles: Vec<JoinHandle<MonitorState>> = {
            let mut monitors = self.monitors.write().await;
            monitors
                .values_mut()
                .filter_map(|entry| entry.handle.take())
                .collect()
        };
        if handles.is_empty() {
            return;
        }

        info!("Draining {} monitor(s)", handles.len());
        let drained =
            tokio::time::timeout(drain, futures::future::join_all(handles.iter_mut())).await;
        if drained.is_ok() {
            return;
        }

        warn!("Monitors did not stop within {:?}, aborting", drain);
        for handle in handles.into_iter().filter(|h| !h.is_finished()) {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Monitor task failed: {}", e);
                }
            }
        }
    }

    /// Drop the oldest finished entries beyond `retain_finished`.
    fn prune(&self, monitors: &mut HashMap<RunKey, MonitorEntry>) {
        let mut finished: Vec<(DateTime<Utc>, RunKey)> = monitors
            .iter()
            .filter(|(_, entry)| entry.current().is_terminal())
            .map(|(key, entry)| (entry.started_at, key.clone()))
            .collect();

        if finished.len() <= self.retain_finished {
            return;
        }

        finished.sort();
        let excess = finished.len() - self.retain_finished;
        for (_, key) in finished.into_iter().take(excess) {
            monitors.remove(&key);
        }
    }
}
