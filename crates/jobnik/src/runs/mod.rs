//! Triggering runs from templates and supervising them until cleanup.

mod listing;
mod logs;
mod monitor;
mod registry;
mod submitter;
mod synthesizer;

pub use listing::{list_runs, paginate, JobPage, ALL_NAMESPACES, DEFAULT_LIMIT};
pub use logs::{read_logs, LOG_LIMIT_BYTES};
pub use monitor::{LifecycleMonitor, MonitorState};
pub use registry::{MonitorView, RunKey, RunRegistry};
pub use submitter::Submitter;
pub use synthesizer::{generate_run_name, synthesize, synthesize_with_name, RUN_LABEL};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    config::MonitorConfig,
    kubernetes::ClusterApi,
    metrics,
    retry::RetryPolicy,
    Error, Result,
};

/// Caller input for a new run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    /// Name of the template Job.
    pub job_name: String,
    pub namespace: String,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl TriggerRequest {
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(Error::Validation("jobName is required".to_string()));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::Validation("namespace is required".to_string()));
        }
        if self.env_vars.keys().any(|k| k.trim().is_empty()) {
            return Err(Error::Validation(
                "envVars must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity of a run that was created and is now being monitored.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredRun {
    pub job_name: String,
    pub namespace: String,
}

/// Fetch → synthesize → submit → monitor, for one request at a time.
pub struct JobTrigger {
    cluster: Arc<dyn ClusterApi>,
    registry: Arc<RunRegistry>,
    submitter: Submitter,
    monitor: MonitorConfig,
}

impl JobTrigger {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        registry: Arc<RunRegistry>,
        retry: RetryPolicy,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            submitter: Submitter::new(cluster.clone(), retry),
            cluster,
            registry,
            monitor,
        }
    }

    pub fn with_submitter(mut self, submitter: Submitter) -> Self {
        self.submitter = submitter;
        self
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Create a run from the request's template and start its monitor.
    ///
    /// Returns as soon as the cluster accepted the run; completion is
    /// handled in the background.
    pub async fn trigger(&self, request: &TriggerRequest) -> Result<TriggeredRun> {
        request.validate()?;

        info!(
            "Fetching job template {}/{}",
            request.namespace, request.job_name
        );
        let template = self
            .cluster
            .get_job(&request.namespace, &request.job_name)
            .await
            .map_err(|e| {
                error!(
                    "Failed to read job template {}/{}: {}",
                    request.namespace, request.job_name, e
                );
                Error::TemplateNotFound {
                    namespace: request.namespace.clone(),
                    name: request.job_name.clone(),
                    source: Box::new(e),
                }
            })?;

        let instance = synthesize(&template, request)?;
        let created = match self.submitter.submit(&instance).await {
            Ok(created) => created,
            Err(e) => {
                metrics::RUN_CREATION_FAILURES_TOTAL.inc();
                return Err(e);
            }
        };

        let run_name = created
            .metadata
            .name
            .clone()
            .or_else(|| instance.metadata.name.clone())
            .ok_or_else(|| Error::Internal("created job has no name".to_string()))?;

        metrics::RUNS_TRIGGERED_TOTAL.inc();
        info!("Job {}/{} triggered successfully", request.namespace, run_name);

        let monitor = LifecycleMonitor::new(
            self.cluster.clone(),
            &request.namespace,
            &run_name,
            self.monitor.clone(),
        );
        self.registry
            .spawn(RunKey::new(&request.namespace, &run_name), monitor)
            .await;

        Ok(TriggeredRun {
            job_name: run_name,
            namespace: request.namespace.clone(),
        })
    }
}
