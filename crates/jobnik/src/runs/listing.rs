use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    kubernetes::{ClusterApi, RunSummary},
    Result,
};

/// Namespace filter value that selects every namespace.
pub const ALL_NAMESPACES: &str = "all";

pub const DEFAULT_LIMIT: usize = 10;

/// A page of the job listing with its pagination metadata.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobPage {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub count: usize,
    pub jobs: Vec<RunSummary>,
}

fn is_all_namespaces(filter: &str) -> bool {
    let filter = filter.trim();
    filter.is_empty() || filter.eq_ignore_ascii_case(ALL_NAMESPACES)
}

/// Present-state snapshot of jobs in one namespace, or in every namespace
/// when `namespace_filter` is empty or `"all"`. Rows are ordered by
/// namespace, then name.
pub async fn list_runs(
    cluster: Arc<dyn ClusterApi>,
    namespace_filter: &str,
) -> Result<Vec<RunSummary>> {
    let mut rows = if is_all_namespaces(namespace_filter) {
        list_all_namespaces(cluster).await?
    } else {
        let namespace = namespace_filter.trim();
        debug!("Fetching jobs in namespace: {}", namespace);
        cluster
            .list_jobs(namespace)
            .await?
            .iter()
            .map(RunSummary::from_job)
            .collect()
    };

    rows.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    Ok(rows)
}

/// One task per namespace, merged into a shared accumulator. A namespace
/// whose listing fails contributes no rows.
async fn list_all_namespaces(cluster: Arc<dyn ClusterApi>) -> Result<Vec<RunSummary>> {
    let namespaces = cluster.list_namespaces().await?;
    info!("Fetching jobs across {} namespace(s)", namespaces.len());

    let accumulator: Arc<Mutex<Vec<RunSummary>>> = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();

    for namespace in namespaces {
        let cluster = cluster.clone();
        let accumulator = accumulator.clone();
        tasks.spawn(async move {
            debug!("Fetching jobs in namespace: {}", namespace);
            match cluster.list_jobs(&namespace).await {
                Ok(jobs) => {
                    let local: Vec<RunSummary> = jobs.iter().map(RunSummary::from_job).collect();
                    accumulator.lock().await.extend(local);
                }
                Err(e) => warn!("Error fetching jobs in namespace {}: {}", namespace, e),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Namespace listing task failed: {}", e);
        }
    }

    let rows = std::mem::take(&mut *accumulator.lock().await);
    Ok(rows)
}

/// Apply `limit`/`offset` to the full result. Out-of-range values clamp to
/// the available rows.
pub fn paginate(rows: Vec<RunSummary>, limit: usize, offset: usize) -> JobPage {
    let total = rows.len();
    let start = offset.min(total);
    let end = start.saturating_add(limit).min(total);

    let jobs: Vec<RunSummary> = rows.into_iter().skip(start).take(end - start).collect();

    JobPage {
        total,
        limit,
        offset,
        count: jobs.len(),
        jobs,
    }
}
