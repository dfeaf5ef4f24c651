mod routes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    kubernetes::ClusterApi,
    runs::{JobTrigger, RunRegistry},
    Error, Result,
};

/// Shared state behind every handler.
pub struct AppState {
    cluster: Option<Arc<dyn ClusterApi>>,
    trigger: Option<JobTrigger>,
    registry: Arc<RunRegistry>,
}

impl AppState {
    fn cluster(&self) -> Result<Arc<dyn ClusterApi>> {
        self.cluster.clone().ok_or(Error::NotReady)
    }

    fn trigger(&self) -> Result<&JobTrigger> {
        self.trigger.as_ref().ok_or(Error::NotReady)
    }
}

pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// `cluster` is `None` only when no client could be attached; the API
    /// then reports not-ready and cluster-backed endpoints answer 503.
    pub fn new(config: &Config, cluster: Option<Arc<dyn ClusterApi>>) -> Self {
        let registry = Arc::new(RunRegistry::new(config.monitor.retain_finished));
        let trigger = cluster.clone().map(|cluster| {
            JobTrigger::new(
                cluster,
                registry.clone(),
                config.retry.clone(),
                config.monitor.clone(),
            )
        });

        Self {
            state: Arc::new(AppState {
                cluster,
                trigger,
                registry,
            }),
        }
    }

    /// The monitor registry, for draining on shutdown.
    pub fn registry(&self) -> Arc<RunRegistry> {
        self.state.registry.clone()
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(routes::health))
            .route("/readiness", get(routes::readiness))
            .route("/jobs", get(routes::list_jobs))
            .route("/job", post(routes::trigger_job))
            .route("/job/logs", get(routes::job_logs))
            .route("/monitors", get(routes::list_monitors))
            .route("/monitors/{namespace}/{name}", delete(routes::cancel_monitor))
            .route("/metrics", get(routes::export_metrics))
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(self.state.clone())
    }
}
