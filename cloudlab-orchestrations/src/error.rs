//! Error types shared across the orchestration layer

use cloudlab_models::InstanceId;
use thiserror::Error;

/// Failure talking to the cluster or interpreting its answer
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("cluster transport error: {0}")]
    Transport(#[from] kube::Error),

    #[error("unexpected {kind} response: {reason}")]
    InvalidResponse { kind: &'static str, reason: String },

    #[error("failed to render {name} template: {source}")]
    Template {
        name: &'static str,
        #[source]
        source: tera::Error,
    },

    #[error("failed to parse {name} manifest: {source}")]
    Manifest {
        name: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ClusterError {
    pub fn invalid_response(kind: &'static str, reason: impl Into<String>) -> Self {
        ClusterError::InvalidResponse { kind, reason: reason.into() }
    }
}

/// Reasons a deployment spec is rejected before submission
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("invalid volume name '{0}'")]
    InvalidVolumeName(String),

    #[error("missing volume for mount '{0}'")]
    MissingVolumeForMount(String),

    #[error("volumes required: deployment declares volume mounts but no volumes")]
    VolumesRequired,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("instance {0} not found")]
    NotFound(InstanceId),

    #[error("instance store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("failed to read deployment helper {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse deployment helper {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failure of a scheduled action, delivered through its handle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("action panicked: {0}")]
    Panicked(String),

    #[error("action was abandoned before completing")]
    Abandoned,
}
