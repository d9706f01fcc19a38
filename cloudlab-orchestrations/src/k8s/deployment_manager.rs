use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::deployment_spec::DeploymentSpec;
use super::pod_health::{classify_pods, PodHealth, PodHealthTracker};
use super::required_name;
use crate::error::ClusterError;
use crate::k8s_client::ClusterApi;
use crate::names::app_selector;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentHandle {
    pub name: String,
    pub namespace: String,
    /// Deployment metadata labels
    pub labels: BTreeMap<String, String>,
    /// Labels stamped on the pods
    pub template_labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub ready_replicas: i32,
    /// Deletion has been requested but the object still exists
    pub terminating: bool,
}

impl DeploymentHandle {
    fn from_object(deployment: Deployment, namespace: &str) -> Result<Self, ClusterError> {
        let name = required_name("Deployment", &deployment.metadata)?;
        let spec = deployment
            .spec
            .ok_or_else(|| ClusterError::invalid_response("Deployment", "spec is missing"))?;

        Ok(Self {
            name,
            namespace: deployment
                .metadata
                .namespace
                .unwrap_or_else(|| namespace.to_string()),
            labels: deployment.metadata.labels.unwrap_or_default(),
            template_labels: spec
                .template
                .metadata
                .and_then(|metadata| metadata.labels)
                .unwrap_or_default(),
            replicas: spec.replicas.unwrap_or(1),
            ready_replicas: deployment
                .status
                .and_then(|status| status.ready_replicas)
                .unwrap_or(0),
            terminating: deployment.metadata.deletion_timestamp.is_some(),
        })
    }
}

#[derive(Clone)]
pub struct DeploymentManager {
    cluster: Arc<dyn ClusterApi>,
}

impl DeploymentManager {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn create(&self, namespace: &str, spec: &DeploymentSpec) -> Result<DeploymentHandle, ClusterError> {
        let deployment = self
            .cluster
            .create_deployment(namespace, spec.deployment())
            .await?;
        info!(deployment = %spec.name(), namespace, "Deployment created");
        DeploymentHandle::from_object(deployment, namespace)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<Option<DeploymentHandle>, ClusterError> {
        self.cluster
            .get_deployment(namespace, name)
            .await?
            .map(|deployment| DeploymentHandle::from_object(deployment, namespace))
            .transpose()
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<bool, ClusterError> {
        self.cluster.delete_deployment(namespace, name).await
    }

    pub async fn scale(&self, name: &str, namespace: &str, replicas: i32) -> Result<DeploymentHandle, ClusterError> {
        let deployment = self
            .cluster
            .scale_deployment(namespace, name, replicas)
            .await?;
        info!(deployment = %name, namespace, replicas, "Deployment scaled");
        DeploymentHandle::from_object(deployment, namespace)
    }

    /// Classify the current pods of a deployment
    pub async fn classify(
        &self,
        deployment: &DeploymentHandle,
        tracker: &mut PodHealthTracker,
    ) -> Result<PodHealth, ClusterError> {
        let pods = self
            .cluster
            .list_pods(&deployment.namespace, &app_selector(&deployment.name))
            .await?;
        let health = classify_pods(&pods, tracker, Instant::now());
        debug!(deployment = %deployment.name, pods = pods.len(), %health, "Pod health observed");
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::DeploymentSpecBuilder;
    use crate::mock::{sample_flavour, sample_image, MockCluster};
    use cloudlab_models::InstanceAccount;
    use std::time::Duration;

    fn spec(name: &str) -> DeploymentSpec {
        DeploymentSpecBuilder::new("cloudlab").build(
            name,
            &sample_image(),
            &sample_flavour(),
            &InstanceAccount::default(),
        )
    }

    #[test]
    fn test_handle_requires_spec() {
        let mut deployment = spec("web-1").into_deployment();
        deployment.spec = None;

        let result = DeploymentHandle::from_object(deployment, "cloudlab");
        assert!(matches!(result, Err(ClusterError::InvalidResponse { kind: "Deployment", .. })));
    }

    #[tokio::test]
    async fn test_create_scale_and_delete() {
        let cluster = Arc::new(MockCluster::new());
        let manager = DeploymentManager::new(cluster.clone());

        let handle = manager.create("cloudlab", &spec("web-1")).await.unwrap();
        assert_eq!(handle.name, "web-1");
        assert_eq!(handle.namespace, "cloudlab");
        assert_eq!(handle.replicas, 1);
        assert_eq!(handle.template_labels["app"], "web-1");

        let stopped = manager.scale("web-1", "cloudlab", 0).await.unwrap();
        assert_eq!(stopped.replicas, 0);

        assert!(manager.delete("web-1", "cloudlab").await.unwrap());
        assert!(manager.get("web-1", "cloudlab").await.unwrap().is_none());
        assert!(!manager.delete("web-1", "cloudlab").await.unwrap());
    }

    #[tokio::test]
    async fn test_classify_reads_pods_of_the_deployment() {
        let cluster = Arc::new(MockCluster::new());
        let manager = DeploymentManager::new(cluster.clone());
        let mut tracker = PodHealthTracker::new(Duration::from_secs(60));

        let healthy = manager.create("cloudlab", &spec("web-1")).await.unwrap();
        let crashing = manager.create("cloudlab", &spec("pod-crash-loop-2")).await.unwrap();

        assert_eq!(manager.classify(&healthy, &mut tracker).await.unwrap(), PodHealth::Running);
        assert_eq!(
            manager.classify(&crashing, &mut tracker).await.unwrap(),
            PodHealth::CrashLoopBackOff
        );
    }
}
