use async_trait::async_trait;
use axum::http::StatusCode;
use jobnik::{
    config::{Config, MonitorConfig},
    kubernetes::ClusterApi,
    server::Server,
    Error, Result,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory stand-in for the cluster API.
#[derive(Default)]
struct FakeCluster {
    jobs: Mutex<BTreeMap<(String, String), Job>>,
    pods: Mutex<Vec<(String, Pod)>>,
    pod_logs: Mutex<BTreeMap<String, String>>,
    calls: AtomicUsize,
}

impl FakeCluster {
    fn with_template(namespace: &str, name: &str) -> Self {
        let cluster = FakeCluster::default();
        cluster.insert(template(namespace, name));
        cluster
    }

    fn insert(&self, job: Job) {
        let key = (
            job.metadata.namespace.clone().unwrap_or_default(),
            job.metadata.name.clone().unwrap_or_default(),
        );
        self.jobs.lock().unwrap().insert(key, job);
    }

    fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn mark_succeeded(&self, namespace: &str, name: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&(namespace.to_string(), name.to_string())) {
            job.status = Some(JobStatus {
                succeeded: Some(1),
                ..Default::default()
            });
        }
    }

    fn add_pod(&self, namespace: &str, name: &str, job_name: &str, logs: &str) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    "job-name".to_string(),
                    job_name.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.pods.lock().unwrap().push((namespace.to_string(), pod));
        self.pod_logs
            .lock()
            .unwrap()
            .insert(name.to_string(), logs.to_string());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        self.record();
        self.job(namespace, name)
            .ok_or_else(|| Error::NotFound(format!("job {}/{}", namespace, name)))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.record();
        let name = job.metadata.name.clone().unwrap_or_default();
        if self.job(namespace, &name).is_some() {
            return Err(Error::Internal(format!("job {}/{} already exists", namespace, name)));
        }
        self.insert(job.clone());
        Ok(job.clone())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.record();
        self.jobs
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("job {}/{}", namespace, name)))
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>> {
        self.record();
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.record();
        let mut namespaces: Vec<String> = self
            .jobs
            .lock()
            .unwrap()
            .keys()
            .map(|(ns, _)| ns.clone())
            .collect();
        namespaces.dedup();
        Ok(namespaces)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        self.record();
        let (key, value) = label_selector
            .split_once('=')
            .ok_or_else(|| Error::Validation(format!("bad selector {}", label_selector)))?;
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|(ns, pod)| {
                ns == namespace
                    && pod
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.get(key))
                        .map(|v| v == value)
                        .unwrap_or(false)
            })
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        pod: &str,
        _container: Option<String>,
        limit_bytes: i64,
    ) -> Result<String> {
        self.record();
        // Cut by bytes, like the API server's limitBytes.
        let logs = self.pod_logs.lock().unwrap();
        let full = logs.get(pod).map(String::as_bytes).unwrap_or_default();
        let end = full.len().min(limit_bytes as usize);
        Ok(String::from_utf8_lossy(&full[..end]).into_owned())
    }
}

fn template(namespace: &str, name: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some("template-uid".to_string()),
            resource_version: Some("42".to_string()),
            labels: Some(BTreeMap::from([("team".to_string(), "data".to_string())])),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "etl".to_string(),
                        image: Some("etl:1.0".to_string()),
                        command: Some(vec!["/bin/etl".to_string()]),
                        ..Default::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn named_job(namespace: &str, name: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.monitor = MonitorConfig {
        poll_interval: Duration::from_millis(20),
        grace_period: Duration::from_millis(50),
        ..Default::default()
    };
    config
}

fn test_server(cluster: Arc<FakeCluster>) -> axum_test::TestServer {
    let server = Server::new(&fast_config(), Some(cluster as Arc<dyn ClusterApi>));
    axum_test::TestServer::new(server.build_router()).unwrap()
}

fn is_run_name(name: &str, template: &str) -> bool {
    name.strip_prefix(&format!("{}-run-", template))
        .map(|rest| {
            let parts: Vec<&str> = rest.split('-').collect();
            parts.len() == 2
                && parts
                    .iter()
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        })
        .unwrap_or(false)
}

#[tokio::test]
async fn test_health_and_readiness() {
    let client = test_server(Arc::new(FakeCluster::default()));

    let response = client.get("/healthz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");

    let response = client.get("/readiness").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_not_ready_without_cluster() {
    let server = Server::new(&fast_config(), None);
    let client = axum_test::TestServer::new(server.build_router()).unwrap();

    let response = client.get("/readiness").await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "not ready");

    let response = client
        .post("/job")
        .json(&json!({ "jobName": "etl-base", "namespace": "batch" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_trigger_run_lifecycle() {
    let cluster = Arc::new(FakeCluster::with_template("batch", "etl-base"));
    let client = test_server(cluster.clone());

    let response = client
        .post("/job")
        .json(&json!({
            "jobName": "etl-base",
            "namespace": "batch",
            "args": ["--mode=full"],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    let run_name = body["jobName"].as_str().unwrap().to_string();
    assert!(is_run_name(&run_name, "etl-base"), "bad run name {}", run_name);
    assert_eq!(body["namespace"], "batch");
    assert!(body["message"].as_str().unwrap().contains(&run_name));

    // The created run carries the overrides and its own identity.
    let created = cluster.job("batch", &run_name).unwrap();
    assert_eq!(created.metadata.uid, None);
    assert_eq!(created.metadata.resource_version, None);
    assert_eq!(
        created.metadata.labels,
        Some(BTreeMap::from([("job-name".to_string(), run_name.clone())]))
    );
    let container = &created.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
    assert_eq!(container.args, Some(vec!["--mode=full".to_string()]));
    assert_eq!(container.env, None);

    // Not finished yet: listed, not deleted.
    let response = client.get("/jobs?namespace=batch").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    let run = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .find(|j| j["name"] == run_name.as_str())
        .cloned()
        .unwrap();
    assert!(run["status"] == "Pending" || run["status"] == "Running");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cluster.job("batch", &run_name).is_some());

    cluster.mark_succeeded("batch", &run_name);

    // Poll + grace are a few tens of milliseconds; allow plenty of slack.
    let mut state = serde_json::Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let body: serde_json::Value = client.get("/monitors").await.json();
        assert_eq!(body["monitors"][0]["jobName"], run_name.as_str());
        state = body["monitors"][0]["state"].clone();
        if state == "Deleted" {
            break;
        }
    }
    assert_eq!(state, "Deleted", "run {} was not cleaned up", run_name);
    assert!(cluster.job("batch", &run_name).is_none());

    let response = client.get("/jobs?namespace=batch").await;
    let body: serde_json::Value = response.json();
    assert!(body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .all(|j| j["name"] != run_name.as_str()));
}

#[tokio::test]
async fn test_trigger_replaces_env() {
    let cluster = FakeCluster::default();
    let mut base = template("batch", "etl-base");
    base.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers[0].env =
        Some(vec![EnvVar {
            name: "INHERITED".to_string(),
            value: Some("1".to_string()),
            ..Default::default()
        }]);
    cluster.insert(base);
    let cluster = Arc::new(cluster);
    let client = test_server(cluster.clone());

    let response = client
        .post("/job")
        .json(&json!({
            "jobName": "etl-base",
            "namespace": "batch",
            "envVars": { "DATE": "2024-01-01", "MODE": "full" },
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    let run_name = body["jobName"].as_str().unwrap();

    let created = cluster.job("batch", run_name).unwrap();
    let env = created.spec.unwrap().template.spec.unwrap().containers[0]
        .env
        .clone()
        .unwrap();
    let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["DATE", "MODE"]);
    assert_eq!(env[0].value.as_deref(), Some("2024-01-01"));
}

#[tokio::test]
async fn test_trigger_validation() {
    let cluster = Arc::new(FakeCluster::with_template("batch", "etl-base"));
    let client = test_server(cluster.clone());

    // Missing namespace
    let response = client
        .post("/job")
        .json(&json!({ "jobName": "etl-base" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().is_some());

    // Empty jobName
    let response = client
        .post("/job")
        .json(&json!({ "jobName": "", "namespace": "batch" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Malformed body
    let response = client
        .post("/job")
        .text("{not json")
        .content_type("application/json")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    assert_eq!(cluster.calls(), 0);
}

#[tokio::test]
async fn test_trigger_missing_template() {
    let cluster = Arc::new(FakeCluster::default());
    let client = test_server(cluster);

    let response = client
        .post("/job")
        .json(&json!({ "jobName": "nope", "namespace": "batch" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("Failed to get base job"));
}

#[tokio::test]
async fn test_list_jobs_pagination() {
    let cluster = FakeCluster::default();
    for i in 0..7 {
        cluster.insert(named_job("batch", &format!("run-{}", i)));
    }
    let client = test_server(Arc::new(cluster));

    let response = client.get("/jobs?namespace=batch&limit=3&offset=5").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("x-total-count").to_str().unwrap(), "7");
    assert_eq!(response.header("x-limit").to_str().unwrap(), "3");
    assert_eq!(response.header("x-offset").to_str().unwrap(), "5");
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 7);
    assert_eq!(body["count"], 2);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 2);

    let response = client.get("/jobs?namespace=batch&offset=10").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 7);
    assert_eq!(body["count"], 0);
    assert_eq!(body["limit"], 10);

    // Defaults
    let response = client.get("/jobs?namespace=batch").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["limit"], 10);
    assert_eq!(body["offset"], 0);
    assert_eq!(body["count"], 7);
}

#[tokio::test]
async fn test_list_jobs_all_namespaces() {
    let cluster = FakeCluster::default();
    cluster.insert(named_job("batch", "b-1"));
    cluster.insert(named_job("etl", "e-1"));
    cluster.insert(named_job("etl", "e-2"));
    let client = test_server(Arc::new(cluster));

    for path in ["/jobs", "/jobs?namespace=all"] {
        let response = client.get(path).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["total"], 3);
        let names: Vec<&str> = body["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["b-1", "e-1", "e-2"]);
    }
}

#[tokio::test]
async fn test_job_logs() {
    let cluster = FakeCluster::default();
    let line = "log line from etl-run-1-abcde\n";
    cluster.add_pod("batch", "etl-run-1-abcde", "etl-run-1", &line.repeat(500));
    let mut split = "x".repeat(1999);
    split.push_str("é tail");
    cluster.add_pod("batch", "etl-run-2-fghij", "etl-run-2", &split);
    let client = test_server(Arc::new(cluster));

    let response = client.get("/job/logs").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("jobName"));

    let response = client.get("/job/logs?jobName=etl-run-1&namespace=batch").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["jobName"], "etl-run-1");
    assert_eq!(body["namespace"], "batch");
    let logs = body["logs"].as_str().unwrap();
    assert!(logs.starts_with("log line from etl-run-1-abcde"));
    assert_eq!(logs.len(), 2000);

    // A character split by the byte limit does not fail the request.
    let response = client.get("/job/logs?jobName=etl-run-2&namespace=batch").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    let logs = body["logs"].as_str().unwrap();
    assert!(logs.starts_with(&"x".repeat(1999)));
    assert!(!logs.contains("tail"));

    // Namespace defaults to "default", where there are no pods.
    let response = client.get("/job/logs?jobName=etl-run-1").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_cancel_unknown_monitor() {
    let client = test_server(Arc::new(FakeCluster::default()));

    let response = client.delete("/monitors/batch/etl-base-run-1-1").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = client.get("/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}
