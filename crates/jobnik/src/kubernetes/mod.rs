mod client;
mod resources;

pub use client::{ClusterApi, KubeClusterApi};
#[cfg(test)]
pub use client::MockClusterApi;
pub use resources::{has_failed_terminally, has_succeeded, RunStatus, RunSummary};
