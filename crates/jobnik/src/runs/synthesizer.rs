//! Turns a fetched template Job into a fresh, creation-ready run.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
use rand::Rng;

use super::TriggerRequest;
use crate::{Error, Result};

/// Label placed on every run and its pods; pod lookup for logs relies on it.
pub const RUN_LABEL: &str = "job-name";

/// Exclusive upper bound of the random part of a run name.
const NAME_SUFFIX_RANGE: u32 = 10_000;

/// `{template}-run-{unix seconds}-{random in [0, 10000)}`.
pub fn generate_run_name(template_name: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let suffix = rand::thread_rng().gen_range(0..NAME_SUFFIX_RANGE);
    format!("{}-run-{}-{}", template_name, timestamp, suffix)
}

/// Synthesize a run from `template` under a freshly generated name.
pub fn synthesize(template: &Job, request: &TriggerRequest) -> Result<Job> {
    let name = generate_run_name(&request.job_name);
    synthesize_with_name(template, request, &name)
}

/// Synthesize a run from `template` named `name`. The template is left untouched.
pub fn synthesize_with_name(template: &Job, request: &TriggerRequest, name: &str) -> Result<Job> {
    let mut job = template.clone();
    let labels = BTreeMap::from([(RUN_LABEL.to_string(), name.to_string())]);

    // Server-assigned identity would make the create call conflict or be rejected.
    let meta = &mut job.metadata;
    meta.name = Some(name.to_string());
    meta.namespace = Some(request.namespace.clone());
    meta.generate_name = None;
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.generation = None;
    meta.self_link = None;
    meta.managed_fields = None;
    meta.labels = Some(labels.clone());
    job.status = None;

    let wants_overrides = !request.env_vars.is_empty() || !request.args.is_empty();

    let Some(spec) = job.spec.as_mut() else {
        if wants_overrides {
            return Err(Error::TemplateMissingContainer(template.name_any()));
        }
        return Ok(job);
    };

    // The template's selector points at the template's own controller-uid.
    spec.selector = None;
    let pod_meta = spec.template.metadata.get_or_insert_with(Default::default);
    pod_meta.name = Some(name.to_string());
    pod_meta.generate_name = None;
    pod_meta.labels = Some(labels);

    if !wants_overrides {
        return Ok(job);
    }

    // Only the first container receives overrides.
    let container = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut())
        .ok_or_else(|| Error::TemplateMissingContainer(template.name_any()))?;

    if !request.env_vars.is_empty() {
        container.env = Some(
            request
                .env_vars
                .iter()
                .map(|(key, value)| EnvVar {
                    name: key.clone(),
                    value: Some(value.clone()),
                    ..Default::default()
                })
                .collect(),
        );
    }

    if !request.args.is_empty() {
        container.args = Some(request.args.clone());
    }

    Ok(job)
}
