use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::AppState;
use crate::{
    metrics,
    runs::{self, RunKey, TriggerRequest, DEFAULT_LIMIT},
    Error, Result,
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    if state.cluster.is_some() {
        (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready" })),
        )
            .into_response()
    }
}

/// Query parameters are kept as strings; values that do not parse fall
/// back to their defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub namespace: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

fn parse_or(raw: Option<&str>, default: usize) -> usize {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => default,
        Some(s) => match s.parse::<i64>() {
            Ok(n) if n < 0 => 0,
            Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
            Err(_) => default,
        },
    }
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Response> {
    let namespace = query.namespace.unwrap_or_default();
    let limit = parse_or(query.limit.as_deref(), DEFAULT_LIMIT);
    let offset = parse_or(query.offset.as_deref(), 0);

    let rows = runs::list_runs(state.cluster()?, &namespace).await?;
    let page = runs::paginate(rows, limit, offset);

    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("x-total-count"), HeaderValue::from(page.total));
    headers.insert(HeaderName::from_static("x-limit"), HeaderValue::from(page.limit));
    headers.insert(HeaderName::from_static("x-offset"), HeaderValue::from(page.offset));

    Ok((StatusCode::OK, headers, Json(page)).into_response())
}

pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) =
        payload.map_err(|e| Error::Validation(format!("Invalid request: {}", e.body_text())))?;

    info!(
        "Trigger requested for template {}/{}",
        request.namespace, request.job_name
    );
    let run = state.trigger()?.trigger(&request).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": format!("Job {} triggered successfully", run.job_name),
            "jobName": run.job_name,
            "namespace": run.namespace,
        })),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub job_name: Option<String>,
    pub namespace: Option<String>,
    pub container: Option<String>,
}

pub async fn job_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Response> {
    let job_name = query
        .job_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            Error::Validation("Missing required query parameter: jobName".to_string())
        })?;
    let namespace = query
        .namespace
        .filter(|ns| !ns.trim().is_empty())
        .unwrap_or_else(|| "default".to_string());
    let container = query.container.filter(|c| !c.trim().is_empty());

    let cluster = state.cluster()?;
    let logs = runs::read_logs(cluster.as_ref(), &namespace, &job_name, container).await?;

    Ok(Json(json!({
        "jobName": job_name,
        "namespace": namespace,
        "logs": logs,
    }))
    .into_response())
}

pub async fn list_monitors(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let monitors = state.registry.snapshot().await;
    Json(json!({ "monitors": monitors }))
}

pub async fn cancel_monitor(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = RunKey::new(&namespace, &name);
    if state.registry.cancel(&key).await {
        (
            StatusCode::OK,
            Json(json!({ "message": format!("Monitor for {} cancelled", key) })),
        )
            .into_response()
    } else {
        warn!("No running monitor for {}", key);
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No running monitor for {}", key) })),
        )
            .into_response()
    }
}

pub async fn export_metrics() -> Result<Response> {
    let body = metrics::gather_metrics()?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))],
        body,
    )
        .into_response())
}
