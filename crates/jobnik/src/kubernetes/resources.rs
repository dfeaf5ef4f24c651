use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

/// Present-state status of a run, derived from the Job's status counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// The counters are not mutually exclusive, so precedence is fixed:
    /// completion, then active pods, then failed pods, else pending.
    pub fn of(job: &Job) -> Self {
        let Some(status) = job.status.as_ref() else {
            return RunStatus::Pending;
        };

        if status.completion_time.is_some() {
            RunStatus::Completed
        } else if status.active.unwrap_or(0) > 0 {
            RunStatus::Running
        } else if status.failed.unwrap_or(0) > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Pending
        }
    }
}

/// At least one pod of the run finished successfully.
pub fn has_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.succeeded)
        .unwrap_or(0)
        > 0
}

/// The Job controller has given up on the run (`Failed` condition is `True`).
///
/// A non-zero `failed` counter alone is not terminal: the controller may
/// still be retrying within the Job's backoff limit.
pub fn has_failed_terminally(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Failed" && c.status == "True")
        })
        .unwrap_or(false)
}

/// One row of the job listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub name: String,
    pub namespace: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    pub container_image: String,
    pub command: Vec<String>,
}

impl RunSummary {
    pub fn from_job(job: &Job) -> Self {
        let container = job
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.containers.first());

        Self {
            name: job.name_any(),
            namespace: job.namespace().unwrap_or_default(),
            status: RunStatus::of(job),
            start_time: job
                .status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .map(|t| t.0),
            completion_time: job
                .status
                .as_ref()
                .and_then(|s| s.completion_time.as_ref())
                .map(|t| t.0),
            container_image: container
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
            command: container
                .and_then(|c| c.command.clone())
                .unwrap_or_default(),
        }
    }
}
