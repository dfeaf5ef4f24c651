use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt};
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{Namespace, Pod},
};
use kube::{
    api::{Api, DeleteParams, ListParams, LogParams, PostParams},
    Client, ResourceExt,
};
use tracing::debug;

use crate::Result;

/// The cluster operations the service depends on.
///
/// `KubeClusterApi` is the production implementation; tests substitute
/// in-memory or mocked clusters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;
    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>>;
    async fn list_namespaces(&self) -> Result<Vec<String>>;
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        limit_bytes: i64,
    ) -> Result<String>;
}

pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from in-cluster config, falling back to the local kubeconfig.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        Ok(self.jobs(namespace).get(name).await?)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let created = self.jobs(namespace).create(&PostParams::default(), job).await?;
        debug!("Created job {}/{}", namespace, created.name_any());
        Ok(created)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        // Background propagation removes the run's pods along with the Job.
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>> {
        let list = self.jobs(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<String>,
        limit_bytes: i64,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container,
            limit_bytes: Some(limit_bytes),
            ..Default::default()
        };
        // The server may send slightly more than `limitBytes`, cut at any byte.
        let stream = pods.log_stream(pod, &params).await?;
        read_capped(Box::pin(stream), limit_bytes).await
    }
}

/// Read at most `limit_bytes` from `reader`. A multi-byte character split
/// by the cut is replaced rather than rejected.
async fn read_capped<R>(reader: R, limit_bytes: i64) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(limit_bytes).unwrap_or(0);
    let mut buffer = Vec::new();
    reader.take(limit).read_to_end(&mut buffer).await?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
