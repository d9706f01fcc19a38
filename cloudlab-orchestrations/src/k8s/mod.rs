//! Per-resource cluster managers
//!
//! Each manager creates, reads and deletes exactly one kind of cluster object and converts raw
//! API objects into validated handles.

pub mod deployment_manager;
pub mod deployment_spec;
pub mod namespace_manager;
pub mod node_service;
pub mod pod_health;
pub mod service_manager;

pub use deployment_manager::{DeploymentHandle, DeploymentManager};
pub use deployment_spec::{DeploymentSpec, DeploymentSpecBuilder};
pub use namespace_manager::{NamespaceHandle, NamespaceManager, NamespaceRequest};
pub use node_service::NodeService;
pub use pod_health::{PodHealth, PodHealthTracker};
pub use service_manager::{ServiceHandle, ServiceManager, ServiceRequest};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use tera::{Context as TeraContext, Tera};

use crate::error::ClusterError;

/// Render a YAML manifest template and parse it into a typed object
fn render_manifest<T: DeserializeOwned>(
    name: &'static str,
    template: &str,
    context: &TeraContext,
) -> Result<T, ClusterError> {
    let mut tera = Tera::default();
    tera.add_raw_template(name, template)
        .map_err(|source| ClusterError::Template { name, source })?;
    let yaml = tera
        .render(name, context)
        .map_err(|source| ClusterError::Template { name, source })?;
    serde_yaml::from_str(&yaml).map_err(|source| ClusterError::Manifest { name, source })
}

/// Name of a returned object; its absence means the response is not the resource we asked for
fn required_name(kind: &'static str, metadata: &ObjectMeta) -> Result<String, ClusterError> {
    metadata
        .name
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ClusterError::invalid_response(kind, "metadata.name is missing"))
}
