use kube::ResourceExt;
use tracing::debug;

use super::synthesizer::RUN_LABEL;
use crate::{kubernetes::ClusterApi, Error, Result};

/// Maximum number of log bytes returned per request.
pub const LOG_LIMIT_BYTES: i64 = 2000;

/// Read the head of the log of the first pod belonging to `job_name`.
pub async fn read_logs(
    cluster: &dyn ClusterApi,
    namespace: &str,
    job_name: &str,
    container: Option<String>,
) -> Result<String> {
    let selector = format!("{}={}", RUN_LABEL, job_name);
    let pods = cluster.list_pods(namespace, &selector).await?;

    // One pod per run unless the template sets parallelism.
    let pod = pods.first().ok_or_else(|| {
        Error::NotFound(format!("no pods found for job {}/{}", namespace, job_name))
    })?;

    let pod_name = pod.name_any();
    debug!("Reading logs of pod {}/{}", namespace, pod_name);
    cluster
        .pod_logs(namespace, &pod_name, container, LOG_LIMIT_BYTES)
        .await
}
