use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tracing::info;

use crate::{
    kubernetes::ClusterApi,
    retry::{retry_always, retry_with_backoff, RetryPolicy},
    Error, Result,
};

/// Decides whether a failed create call is attempted again.
pub type RetryClassifier = fn(&Error) -> bool;

/// Submits synthesized runs to the cluster with exponential backoff.
///
/// By default every error is retried, including permanent ones such as a
/// name conflict or a rejected spec. Those burn the remaining attempts
/// before `CreationFailed` is returned; pass a stricter classifier through
/// [`Submitter::with_classifier`] to stop early.
#[derive(Clone)]
pub struct Submitter {
    cluster: Arc<dyn ClusterApi>,
    policy: RetryPolicy,
    should_retry: RetryClassifier,
}

impl Submitter {
    pub fn new(cluster: Arc<dyn ClusterApi>, policy: RetryPolicy) -> Self {
        Self {
            cluster,
            policy,
            should_retry: retry_always::<Error>,
        }
    }

    pub fn with_classifier(mut self, should_retry: RetryClassifier) -> Self {
        self.should_retry = should_retry;
        self
    }

    pub async fn submit(&self, job: &Job) -> Result<Job> {
        let name = job.name_any();
        let namespace = job.namespace().unwrap_or_else(|| "default".to_string());
        let operation = format!("create job {}/{}", namespace, name);

        info!("Attempting creation of job {}/{} with retry", namespace, name);

        retry_with_backoff(&self.policy, &operation, self.should_retry, || {
            self.cluster.create_job(&namespace, job)
        })
        .await
        .map_err(|exhausted| Error::CreationFailed {
            name: name.clone(),
            attempts: exhausted.attempts,
            source: Box::new(exhausted.error),
        })
    }
}
