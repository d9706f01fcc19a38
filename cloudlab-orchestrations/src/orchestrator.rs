//! Instance-level cluster orchestration
//!
//! Composes the namespace, deployment, service and node managers into create, delete and status
//! operations on a whole instance. Cluster failures stop here: callers receive an instance state
//! carrying ERROR or UNKNOWN with a diagnostic, never a transport error.

use std::sync::Arc;
use std::time::Instant;

use cloudlab_models::{Instance, InstanceStatus};
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::ClusterError;
use crate::helper::DeploymentHelper;
use crate::k8s::{
    DeploymentHandle, DeploymentManager, DeploymentSpec, DeploymentSpecBuilder, NamespaceManager,
    NamespaceRequest, NodeService, PodHealth, PodHealthTracker, ServiceHandle, ServiceManager,
    ServiceRequest,
};
use crate::k8s_client::ClusterApi;
use crate::names::compute_name;
use crate::types::{K8sInstance, K8sInstanceState};

pub struct InstanceOrchestrator {
    config: OrchestratorConfig,
    spec_builder: DeploymentSpecBuilder,
    namespace_manager: NamespaceManager,
    deployment_manager: DeploymentManager,
    service_manager: ServiceManager,
    node_service: NodeService,
}

impl InstanceOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        config: OrchestratorConfig,
        helper: Option<Arc<dyn DeploymentHelper>>,
    ) -> Self {
        let spec_builder = DeploymentSpecBuilder::new(config.owner_label.clone())
            .with_image_pull_secret(config.image_pull_secret.clone())
            .with_helper(helper);

        Self {
            spec_builder,
            namespace_manager: NamespaceManager::new(cluster.clone()),
            deployment_manager: DeploymentManager::new(cluster.clone()),
            service_manager: ServiceManager::new(cluster.clone()),
            node_service: NodeService::new(cluster),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Namespace holding instance workloads
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn namespace_manager(&self) -> &NamespaceManager {
        &self.namespace_manager
    }

    pub fn deployment_manager(&self) -> &DeploymentManager {
        &self.deployment_manager
    }

    pub fn service_manager(&self) -> &ServiceManager {
        &self.service_manager
    }

    pub fn node_service(&self) -> &NodeService {
        &self.node_service
    }

    /// Provision namespace, deployment and service for an instance and wait for its pod.
    pub async fn create(&self, instance: &Instance) -> K8sInstance {
        let name = compute_name(instance);
        info!(instance_id = instance.id, compute_id = %name, "Creating Kubernetes instance");

        self.check_node_capacity().await;

        // Step 1: namespace
        let namespace_request = NamespaceRequest::new(self.namespace(), &self.config.owner_label);
        let namespace = match self.namespace_manager.ensure(&namespace_request).await {
            Ok(namespace) => namespace,
            Err(e) => {
                error!(instance_id = instance.id, error = %e, "Failed to ensure namespace");
                return K8sInstance::failed(None, format!("namespace {} unavailable: {}", self.namespace(), e));
            }
        };

        // Step 2: deployment spec, rejected before anything reaches the cluster
        let spec = self.spec_builder.build(&name, &instance.image, &instance.flavour, &instance.account);
        if let Err(e) = spec.validate() {
            error!(instance_id = instance.id, compute_id = %name, "Kubernetes deployment request rejected: {}", e);
            return K8sInstance::failed(Some(namespace), format!("invalid deployment: {}", e));
        }

        // Step 3: deployment
        let deployment = match self.submit_deployment(&namespace.name, &spec).await {
            Ok(deployment) => deployment,
            Err(e) => {
                error!(instance_id = instance.id, compute_id = %name, error = %e, "Failed to submit deployment");
                return K8sInstance::failed(Some(namespace), format!("deployment submission failed: {}", e));
            }
        };

        // Step 4: service bound to the deployment pods through the app label
        let service_request = ServiceRequest::for_image(&name, &instance.image, &self.config.service_type);
        let service = match self.submit_service(&namespace.name, &service_request).await {
            Ok(service) => service,
            Err(e) => {
                error!(instance_id = instance.id, compute_id = %name, error = %e, "Failed to submit service");
                return K8sInstance {
                    namespace: Some(namespace),
                    deployment: Some(deployment),
                    service: None,
                    state: K8sInstanceState::error(format!("service submission failed: {}", e)),
                };
            }
        };

        // Step 5: pod health
        let state = self.observe_until_settled(&deployment).await;
        info!(
            instance_id = instance.id,
            compute_id = %name,
            status = %state.status,
            "Kubernetes instance created"
        );

        K8sInstance {
            namespace: Some(namespace),
            deployment: Some(deployment),
            service: Some(service),
            state,
        }
    }

    /// Remove service then deployment. True once the workload no longer exists.
    pub async fn delete(&self, compute_id: &str, namespace: &str) -> bool {
        info!(compute_id, namespace, "Deleting Kubernetes instance");

        match self.service_manager.delete(compute_id, namespace).await {
            Ok(true) => debug!(compute_id, "Service deleted"),
            Ok(false) => debug!(compute_id, "Service not found, skipping"),
            Err(e) => {
                warn!(compute_id, error = %e, "Failed to delete service");
                return false;
            }
        }

        match self.deployment_manager.delete(compute_id, namespace).await {
            Ok(true) => debug!(compute_id, "Deployment deleted"),
            Ok(false) => debug!(compute_id, "Deployment not found, skipping"),
            Err(e) => {
                warn!(compute_id, error = %e, "Failed to delete deployment");
                return false;
            }
        }

        match self.deployment_manager.get(compute_id, namespace).await {
            Ok(None) => true,
            Ok(Some(deployment)) => deployment.terminating,
            Err(e) => {
                warn!(compute_id, error = %e, "Could not confirm deployment removal");
                false
            }
        }
    }

    /// Recompute the instance from current cluster state. `None` when no live deployment exists.
    pub async fn get_by_compute_id(&self, compute_id: &str) -> Result<Option<K8sInstance>, ClusterError> {
        let namespace_name = self.namespace();
        let Some(deployment) = self.deployment_manager.get(compute_id, namespace_name).await? else {
            return Ok(None);
        };
        if deployment.terminating {
            return Ok(None);
        }

        let namespace = self.namespace_manager.get(namespace_name).await?;
        let service = self.service_manager.get(compute_id, namespace_name).await?;

        let state = if deployment.replicas == 0 {
            K8sInstanceState::new(InstanceStatus::Stopped, None)
        } else if service.is_none() {
            K8sInstanceState::error("service is missing")
        } else {
            // One observation only: ContainerCreating timeouts come from the pod's age
            let mut tracker = PodHealthTracker::new(self.config.container_creating_timeout);
            let health = self.deployment_manager.classify(&deployment, &mut tracker).await?;
            K8sInstanceState::from_health(health)
        };

        Ok(Some(K8sInstance {
            namespace,
            deployment: Some(deployment),
            service,
            state,
        }))
    }

    /// Current status of a workload, for persisting
    pub async fn refresh(&self, compute_id: &str) -> K8sInstanceState {
        match self.get_by_compute_id(compute_id).await {
            Ok(Some(instance)) => instance.state,
            Ok(None) => K8sInstanceState::error("workload not found"),
            Err(e) => {
                warn!(compute_id, error = %e, "Failed to read instance state");
                K8sInstanceState::new(InstanceStatus::Unknown, Some(format!("cluster unavailable: {}", e)))
            }
        }
    }

    /// Scale the workload to one replica and wait for its pod
    pub async fn start(&self, compute_id: &str) -> K8sInstanceState {
        match self.deployment_manager.scale(compute_id, self.namespace(), 1).await {
            Ok(deployment) => self.observe_until_settled(&deployment).await,
            Err(e) => {
                error!(compute_id, error = %e, "Failed to start instance");
                K8sInstanceState::error(format!("start failed: {}", e))
            }
        }
    }

    /// Scale the workload to zero replicas
    pub async fn shutdown(&self, compute_id: &str) -> K8sInstanceState {
        match self.deployment_manager.scale(compute_id, self.namespace(), 0).await {
            Ok(_) => K8sInstanceState::new(InstanceStatus::Stopped, None),
            Err(e) => {
                error!(compute_id, error = %e, "Failed to shut down instance");
                K8sInstanceState::error(format!("shutdown failed: {}", e))
            }
        }
    }

    /// Poll pod health until it is Running, terminal, or `ready_timeout` has passed.
    ///
    /// The last observation is returned when the timeout is reached.
    pub async fn wait_for_health(&self, deployment: &DeploymentHandle) -> Result<PodHealth, ClusterError> {
        let mut tracker = PodHealthTracker::new(self.config.container_creating_timeout);
        let deadline = Instant::now() + self.config.ready_timeout;

        loop {
            let health = self.deployment_manager.classify(deployment, &mut tracker).await?;
            if health == PodHealth::Running || health.is_terminal() {
                return Ok(health);
            }
            if Instant::now() >= deadline {
                debug!(deployment = %deployment.name, %health, "Stopped waiting for pod health");
                return Ok(health);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn observe_until_settled(&self, deployment: &DeploymentHandle) -> K8sInstanceState {
        match self.wait_for_health(deployment).await {
            Ok(health) => K8sInstanceState::from_health(health),
            Err(e) => {
                warn!(deployment = %deployment.name, error = %e, "Failed to observe pod health");
                K8sInstanceState::new(InstanceStatus::Unknown, Some(format!("pod health unavailable: {}", e)))
            }
        }
    }

    async fn submit_deployment(&self, namespace: &str, spec: &DeploymentSpec) -> Result<DeploymentHandle, ClusterError> {
        if let Some(existing) = self.deployment_manager.get(spec.name(), namespace).await? {
            debug!(deployment = %spec.name(), "Deployment already exists, reusing");
            return Ok(existing);
        }
        self.deployment_manager.create(namespace, spec).await
    }

    async fn submit_service(&self, namespace: &str, request: &ServiceRequest) -> Result<ServiceHandle, ClusterError> {
        if let Some(existing) = self.service_manager.get(&request.name, namespace).await? {
            debug!(service = %request.name, "Service already exists, reusing");
            return Ok(existing);
        }
        self.service_manager.create(namespace, request).await
    }

    async fn check_node_capacity(&self) {
        match self.node_service.list_ready().await {
            Ok(nodes) if nodes.is_empty() => warn!("No ready nodes, pods will stay pending"),
            Ok(nodes) => debug!(ready_nodes = nodes.len(), "Cluster nodes ready"),
            Err(e) => warn!(error = %e, "Failed to list cluster nodes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sample_instance, MockCluster};
    use cloudlab_models::ImageVolume;
    use std::time::Duration;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            namespace: "panosc".to_string(),
            poll_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_secs(2),
            container_creating_timeout: Duration::from_millis(40),
            ..Default::default()
        }
    }

    fn orchestrator() -> (Arc<MockCluster>, InstanceOrchestrator) {
        let cluster = Arc::new(MockCluster::new());
        let orchestrator = InstanceOrchestrator::new(cluster.clone(), test_config(), None);
        (cluster, orchestrator)
    }

    #[tokio::test]
    async fn test_create_kubernetes_instance() {
        let (_cluster, orchestrator) = orchestrator();
        let instance = sample_instance(3, "desktop");

        let k8s_instance = orchestrator.create(&instance).await;

        assert_eq!(k8s_instance.status(), InstanceStatus::Active);
        assert_eq!(k8s_instance.compute_id(), Some("desktop-3"));
        assert_eq!(k8s_instance.namespace.unwrap().name, "panosc");
        assert!(k8s_instance.service.is_some());
    }

    #[tokio::test]
    async fn test_create_instance_and_verify_label_connection() {
        let (_cluster, orchestrator) = orchestrator();
        for (id, name) in [(3, "desktop"), (4, "Jupyter Lab"), (5, "x")] {
            let k8s_instance = orchestrator.create(&sample_instance(id, name)).await;

            let deployment = k8s_instance.deployment.unwrap();
            let service = k8s_instance.service.unwrap();
            assert_eq!(deployment.template_labels["app"], service.selector["app"]);
            assert_eq!(deployment.labels["app"], service.selector["app"]);
        }
    }

    #[tokio::test]
    async fn test_create_and_delete_kubernetes_instance() {
        let (cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator.create(&sample_instance(3, "desktop")).await;
        let compute_id = k8s_instance.compute_id().unwrap().to_string();

        assert!(orchestrator.delete(&compute_id, "panosc").await);
        assert!(orchestrator.get_by_compute_id(&compute_id).await.unwrap().is_none());
        assert_eq!(cluster.service_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_cluster, orchestrator) = orchestrator();
        assert!(orchestrator.delete("never-created-1", "panosc").await);
    }

    #[tokio::test]
    async fn test_create_instance_with_service_error() {
        let (_cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator.create(&sample_instance(999, "endpoint-error")).await;

        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
        assert!(k8s_instance.service.is_none());
        assert!(k8s_instance.state.message.unwrap().contains("service"));
    }

    #[tokio::test]
    async fn test_create_instance_with_deployment_error_pod_back_off() {
        let (_cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator.create(&sample_instance(999, "pod-crash-loop")).await;
        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
    }

    #[tokio::test]
    async fn test_create_instance_with_deployment_error_container_creating_timeout() {
        let (_cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator
            .create(&sample_instance(999, "pod-container-creating-timeout"))
            .await;

        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
        assert!(k8s_instance.state.message.unwrap().contains("ContainerCreating"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_container_creating_timeout() {
        let (_cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator
            .create(&sample_instance(999, "pod-container-creating-timeout"))
            .await;
        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
        let compute_id = k8s_instance.compute_id().unwrap().to_string();

        let state = orchestrator.refresh(&compute_id).await;
        assert_eq!(state.status, InstanceStatus::Error);
        assert!(state.message.unwrap().contains("ContainerCreating"));
    }

    #[tokio::test]
    async fn test_create_instance_with_deployment_error_image_pull() {
        let (_cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator.create(&sample_instance(999, "pod-err-image-pull")).await;
        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
    }

    #[tokio::test]
    async fn test_invalid_spec_never_reaches_the_cluster() {
        let (cluster, orchestrator) = orchestrator();
        let mut instance = sample_instance(7, "desktop");
        instance.image.volumes = vec![ImageVolume {
            name: "data".to_string(),
            path: "/data".to_string(),
            read_only: false,
        }];

        let k8s_instance = orchestrator.create(&instance).await;

        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
        assert_eq!(k8s_instance.compute_id(), None);
        assert_eq!(cluster.deployment_count(), 0);
    }

    #[tokio::test]
    async fn test_create_reuses_existing_resources() {
        let (cluster, orchestrator) = orchestrator();
        let instance = sample_instance(3, "desktop");

        orchestrator.create(&instance).await;
        let again = orchestrator.create(&instance).await;

        assert_eq!(again.status(), InstanceStatus::Active);
        assert_eq!(cluster.deployment_count(), 1);
        assert_eq!(cluster.service_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_yields_error_then_unknown() {
        let (cluster, orchestrator) = orchestrator();
        cluster.set_unavailable(true);

        let k8s_instance = orchestrator.create(&sample_instance(3, "desktop")).await;
        assert_eq!(k8s_instance.status(), InstanceStatus::Error);
        assert_eq!(k8s_instance.compute_id(), None);

        let state = orchestrator.refresh("desktop-3").await;
        assert_eq!(state.status, InstanceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_shutdown_start_and_refresh() {
        let (_cluster, orchestrator) = orchestrator();
        orchestrator.create(&sample_instance(3, "desktop")).await;

        assert_eq!(orchestrator.shutdown("desktop-3").await.status, InstanceStatus::Stopped);
        assert_eq!(orchestrator.refresh("desktop-3").await.status, InstanceStatus::Stopped);

        assert_eq!(orchestrator.start("desktop-3").await.status, InstanceStatus::Active);
        assert_eq!(orchestrator.refresh("desktop-3").await.status, InstanceStatus::Active);
    }

    #[tokio::test]
    async fn test_refresh_of_missing_workload_is_error() {
        let (_cluster, orchestrator) = orchestrator();
        let state = orchestrator.refresh("gone-1").await;

        assert_eq!(state.status, InstanceStatus::Error);
        assert_eq!(state.message.as_deref(), Some("workload not found"));
    }

    #[tokio::test]
    async fn test_refresh_detects_missing_service() {
        let (cluster, orchestrator) = orchestrator();
        let k8s_instance = orchestrator.create(&sample_instance(999, "endpoint-error")).await;
        let compute_id = k8s_instance.compute_id().unwrap().to_string();
        assert_eq!(cluster.service_count(), 0);

        let state = orchestrator.refresh(&compute_id).await;
        assert_eq!(state.status, InstanceStatus::Error);
    }
}
