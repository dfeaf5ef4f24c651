pub mod config;
pub mod kubernetes;
pub mod metrics;
pub mod retry;
pub mod runs;
pub mod server;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Failed to get base job {namespace}/{name}: {source}")]
    TemplateNotFound {
        namespace: String,
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Job template {0} has no containers to apply overrides to")]
    TemplateMissingContainer(String),
    #[error("Failed to create job {name} after {attempts} attempt(s): {source}")]
    CreationFailed {
        name: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Kubernetes client is not ready")]
    NotReady,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the cluster reported that the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kubernetes(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
