use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;
use tracing::{debug, info};

use super::{render_manifest, required_name};
use crate::error::ClusterError;
use crate::k8s_client::ClusterApi;

const TEMPLATE: &str = include_str!("../templates/namespace.yaml");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamespaceRequest {
    pub name: String,
    pub owner: String,
}

impl NamespaceRequest {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self { name: name.into(), owner: owner.into() }
    }

    fn manifest(&self) -> Result<Namespace, ClusterError> {
        let mut context = TeraContext::new();
        context.insert("name", &self.name);
        context.insert("owner", &self.owner);
        render_manifest("namespace", TEMPLATE, &context)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NamespaceHandle {
    pub name: String,
}

impl TryFrom<Namespace> for NamespaceHandle {
    type Error = ClusterError;

    fn try_from(namespace: Namespace) -> Result<Self, Self::Error> {
        Ok(Self {
            name: required_name("Namespace", &namespace.metadata)?,
        })
    }
}

#[derive(Clone)]
pub struct NamespaceManager {
    cluster: Arc<dyn ClusterApi>,
}

impl NamespaceManager {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn create(&self, request: &NamespaceRequest) -> Result<NamespaceHandle, ClusterError> {
        let namespace = self.cluster.create_namespace(&request.manifest()?).await?;
        info!(namespace = %request.name, "Namespace created");
        NamespaceHandle::try_from(namespace)
    }

    pub async fn get(&self, name: &str) -> Result<Option<NamespaceHandle>, ClusterError> {
        self.cluster
            .get_namespace(name)
            .await?
            .map(NamespaceHandle::try_from)
            .transpose()
    }

    pub async fn delete(&self, name: &str) -> Result<bool, ClusterError> {
        self.cluster.delete_namespace(name).await
    }

    /// Reuse the namespace when it exists, create it otherwise
    pub async fn ensure(&self, request: &NamespaceRequest) -> Result<NamespaceHandle, ClusterError> {
        if let Some(existing) = self.get(&request.name).await? {
            debug!(namespace = %request.name, "Namespace already exists, reusing");
            return Ok(existing);
        }
        self.create(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;

    #[test]
    fn test_manifest_renders_name_and_owner() {
        let namespace = NamespaceRequest::new("cloudlab", "lab-owner").manifest().unwrap();
        assert_eq!(namespace.metadata.name.as_deref(), Some("cloudlab"));
        assert_eq!(namespace.metadata.labels.unwrap()["owner"], "lab-owner");
    }

    #[test]
    fn test_numeric_owner_stays_a_string_label() {
        for owner in ["123", "true", "null"] {
            let namespace = NamespaceRequest::new("cloudlab", owner).manifest().unwrap();
            assert_eq!(namespace.metadata.labels.unwrap()["owner"], owner);
        }
    }

    #[test]
    fn test_handle_requires_name() {
        let result = NamespaceHandle::try_from(Namespace::default());
        assert!(matches!(result, Err(ClusterError::InvalidResponse { kind: "Namespace", .. })));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let cluster = Arc::new(MockCluster::new());
        let manager = NamespaceManager::new(cluster.clone());
        let request = NamespaceRequest::new("cloudlab", "cloudlab");

        let first = manager.ensure(&request).await.unwrap();
        let second = manager.ensure(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cluster.namespace_count(), 1);
        assert!(manager.delete("cloudlab").await.unwrap());
        assert!(manager.get("cloudlab").await.unwrap().is_none());
        assert!(!manager.delete("cloudlab").await.unwrap());
    }
}
