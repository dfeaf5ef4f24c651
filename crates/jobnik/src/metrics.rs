use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RUNS_TRIGGERED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "jobnik_runs_triggered_total",
        "Total number of runs created from templates.",
        REGISTRY
    )
    .unwrap();
    pub static ref RUN_CREATION_FAILURES_TOTAL: IntCounter = register_int_counter_with_registry!(
        "jobnik_run_creation_failures_total",
        "Total number of runs whose creation failed after all retries.",
        REGISTRY
    )
    .unwrap();
    pub static ref RUNS_DELETED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "jobnik_runs_deleted_total",
        "Total number of finished runs deleted by their monitor.",
        REGISTRY
    )
    .unwrap();
    pub static ref MONITORS_ACTIVE: IntGauge = register_int_gauge_with_registry!(
        "jobnik_monitors_active",
        "Number of lifecycle monitors currently running.",
        REGISTRY
    )
    .unwrap();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> crate::Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| crate::Error::Internal(format!("failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::Error::Internal(format!("metrics are not valid UTF-8: {}", e)))
}
