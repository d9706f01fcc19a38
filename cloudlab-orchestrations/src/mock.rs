//! In-memory cluster and instance store for tests and local runs
//!
//! [`MockCluster`] picks pod behaviour from the workload name prefix:
//!
//! - `endpoint-error` → service creation fails
//! - `pod-crash-loop` → container waits in CrashLoopBackOff
//! - `pod-err-image-pull` → container waits in ErrImagePull
//! - `pod-container-creating-timeout` → container stays in ContainerCreating
//!
//! Any other name gets one ready pod per replica.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudlab_models::{
    Flavour, Image, ImageProtocol, Instance, InstanceAccount, InstanceId, InstanceStatus, Protocol,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, Namespace, Node,
    NodeCondition, NodeStatus, Pod, PodStatus, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use crate::error::{ClusterError, StoreError};
use crate::k8s_client::ClusterApi;
use crate::names::APP_LABEL;
use crate::store::InstanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Healthy,
    EndpointError,
    CrashLoop,
    ImagePull,
    ContainerCreating,
}

impl Scenario {
    fn for_name(name: &str) -> Self {
        if name.starts_with("endpoint-error") {
            Scenario::EndpointError
        } else if name.starts_with("pod-crash-loop") {
            Scenario::CrashLoop
        } else if name.starts_with("pod-err-image-pull") {
            Scenario::ImagePull
        } else if name.starts_with("pod-container-creating-timeout") {
            Scenario::ContainerCreating
        } else {
            Scenario::Healthy
        }
    }

    fn pod(&self, name: &str) -> Pod {
        match self {
            Scenario::Healthy | Scenario::EndpointError => pod_ready(name),
            Scenario::CrashLoop => {
                let mut pod = pod_waiting(name, "CrashLoopBackOff");
                if let Some(status) = pod.status.as_mut() {
                    status.phase = Some("Running".to_string());
                }
                pod
            }
            Scenario::ImagePull => pod_waiting(name, "ErrImagePull"),
            Scenario::ContainerCreating => pod_waiting(name, "ContainerCreating"),
        }
    }
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, Namespace>,
    deployments: BTreeMap<(String, String), Deployment>,
    services: BTreeMap<(String, String), Service>,
    /// When the current pods of each deployment were created
    pods_created: BTreeMap<(String, String), DateTime<Utc>>,
    nodes: Vec<Node>,
    operations: Vec<String>,
}

#[derive(Default)]
pub struct MockCluster {
    state: Mutex<ClusterState>,
    latency: Duration,
    unavailable: AtomicBool,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn conflict(kind: &str, name: &str) -> ClusterError {
    ClusterError::Api {
        code: 409,
        message: format!("{} {} already exists", kind, name),
    }
}

fn not_found(kind: &str, name: &str) -> ClusterError {
    ClusterError::Api {
        code: 404,
        message: format!("{} {} not found", kind, name),
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every mutating call, widening the window in which overlapping calls would show
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every call fail as if the API server were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn add_node(&self, node: Node) {
        lock(&self.state).nodes.push(node);
    }

    pub fn namespace_count(&self) -> usize {
        lock(&self.state).namespaces.len()
    }

    pub fn deployment_count(&self) -> usize {
        lock(&self.state).deployments.len()
    }

    pub fn service_count(&self) -> usize {
        lock(&self.state).services.len()
    }

    /// Completed mutating calls in completion order, e.g. `scale desktop-3 0`
    pub fn operations(&self) -> Vec<String> {
        lock(&self.state).operations.clone()
    }

    /// Highest number of mutating calls seen in flight at once for a single workload
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ClusterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClusterError::Api {
                code: 503,
                message: "cluster unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn begin_mutation(&self, workload: &str) -> Result<(), ClusterError> {
        self.check_available()?;
        {
            let mut in_flight = lock(&self.in_flight);
            let count = in_flight.entry(workload.to_string()).or_insert(0);
            *count += 1;
            self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }

    fn end_mutation(&self, workload: &str, operation: String) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(count) = in_flight.get_mut(workload) {
            *count = count.saturating_sub(1);
        }
        lock(&self.state).operations.push(operation);
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        self.check_available()?;
        let name = namespace.metadata.name.clone().unwrap_or_default();
        let mut state = lock(&self.state);
        if state.namespaces.contains_key(&name) {
            return Err(conflict("Namespace", &name));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace.clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
        self.check_available()?;
        Ok(lock(&self.state).namespaces.get(name).cloned())
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, ClusterError> {
        self.check_available()?;
        Ok(lock(&self.state).namespaces.remove(name).is_some())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.begin_mutation(&name).await?;

        let result = {
            let mut state = lock(&self.state);
            if state.deployments.contains_key(&key(namespace, &name)) {
                Err(conflict("Deployment", &name))
            } else {
                let mut created = deployment.clone();
                created.metadata.namespace = Some(namespace.to_string());
                state.deployments.insert(key(namespace, &name), created.clone());
                state.pods_created.insert(key(namespace, &name), Utc::now());
                Ok(created)
            }
        };

        self.end_mutation(&name, format!("create-deployment {}", name));
        result
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        self.check_available()?;
        let state = lock(&self.state);
        Ok(state.deployments.get(&key(namespace, name)).cloned().map(|mut deployment| {
            let replicas = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
            let ready = match Scenario::for_name(name) {
                Scenario::Healthy | Scenario::EndpointError => replicas,
                _ => 0,
            };
            deployment.status = Some(DeploymentStatus {
                replicas: Some(replicas),
                ready_replicas: Some(ready),
                ..Default::default()
            });
            deployment
        }))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.begin_mutation(name).await?;
        let removed = {
            let mut state = lock(&self.state);
            state.pods_created.remove(&key(namespace, name));
            state.deployments.remove(&key(namespace, name)).is_some()
        };
        self.end_mutation(name, format!("delete-deployment {}", name));
        Ok(removed)
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<Deployment, ClusterError> {
        self.begin_mutation(name).await?;

        let result = {
            let mut state = lock(&self.state);
            let scaled = state.deployments.get_mut(&key(namespace, name)).map(|deployment| {
                let previous = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
                if let Some(spec) = deployment.spec.as_mut() {
                    spec.replicas = Some(replicas);
                }
                (previous, deployment.clone())
            });
            match scaled {
                Some((previous, deployment)) => {
                    // Scaling up from zero brings fresh pods
                    if previous <= 0 && replicas > 0 {
                        state.pods_created.insert(key(namespace, name), Utc::now());
                    }
                    Ok(deployment)
                }
                None => Err(not_found("Deployment", name)),
            }
        };

        self.end_mutation(name, format!("scale {} {}", name, replicas));
        result
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.begin_mutation(&name).await?;

        let result = if Scenario::for_name(&name) == Scenario::EndpointError {
            Err(ClusterError::Api {
                code: 500,
                message: format!("failed to allocate endpoint for {}", name),
            })
        } else {
            let mut state = lock(&self.state);
            if state.services.contains_key(&key(namespace, &name)) {
                Err(conflict("Service", &name))
            } else {
                let mut created = service.clone();
                created.metadata.namespace = Some(namespace.to_string());
                if let Some(spec) = created.spec.as_mut() {
                    spec.cluster_ip.get_or_insert_with(|| "10.96.0.10".to_string());
                }
                state.services.insert(key(namespace, &name), created.clone());
                Ok(created)
            }
        };

        self.end_mutation(&name, format!("create-service {}", name));
        result
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        self.check_available()?;
        Ok(lock(&self.state).services.get(&key(namespace, name)).cloned())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        self.begin_mutation(name).await?;
        let removed = lock(&self.state).services.remove(&key(namespace, name)).is_some();
        self.end_mutation(name, format!("delete-service {}", name));
        Ok(removed)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        self.check_available()?;
        let app = label_selector
            .strip_prefix(APP_LABEL)
            .and_then(|rest| rest.strip_prefix('='))
            .unwrap_or(label_selector);

        let state = lock(&self.state);
        let Some(deployment) = state.deployments.get(&key(namespace, app)) else {
            return Ok(Vec::new());
        };
        let replicas = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let scenario = Scenario::for_name(app);
        let created = state.pods_created.get(&key(namespace, app)).copied();

        Ok((0..replicas.max(0))
            .map(|index| {
                let mut pod = scenario.pod(&format!("{}-{}", app, index));
                pod.metadata.namespace = Some(namespace.to_string());
                pod.metadata.labels = Some(BTreeMap::from([(APP_LABEL.to_string(), app.to_string())]));
                pod.metadata.creation_timestamp = created.map(Time);
                pod
            })
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.check_available()?;
        Ok(lock(&self.state).nodes.clone())
    }
}

/// [`InstanceStore`] holding instances in memory and recording every saved status
#[derive(Default)]
pub struct MemoryInstanceStore {
    instances: Mutex<HashMap<InstanceId, Instance>>,
    history: Mutex<Vec<(InstanceId, InstanceStatus)>>,
    fail_saves: AtomicBool,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let store = Self::new();
        for instance in instances {
            store.insert(instance);
        }
        store
    }

    pub fn insert(&self, instance: Instance) {
        lock(&self.instances).insert(instance.id, instance);
    }

    pub fn get(&self, id: InstanceId) -> Option<Instance> {
        lock(&self.instances).get(&id).cloned()
    }

    /// Statuses saved for an instance, oldest first
    pub fn status_history(&self, id: InstanceId) -> Vec<InstanceStatus> {
        lock(&self.history)
            .iter()
            .filter(|(instance_id, _)| *instance_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn get_by_id(&self, id: InstanceId) -> Result<Instance, StoreError> {
        self.get(id).ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, instance: &Instance) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store is read-only".to_string()));
        }
        lock(&self.history).push((instance.id, instance.status));
        self.insert(instance.clone());
        Ok(())
    }
}

pub fn sample_image() -> Image {
    Image {
        id: 1,
        name: "desktop".to_string(),
        repository: Some("registry.example.org/lab".to_string()),
        path: "desktop:1.0".to_string(),
        command: None,
        args: None,
        protocols: vec![ImageProtocol {
            protocol: Protocol {
                id: 1,
                name: "SSH".to_string(),
                port: 22,
            },
            port: None,
        }],
        volumes: Vec::new(),
        env_vars: Vec::new(),
        run_as_uid: None,
    }
}

pub fn sample_flavour() -> Flavour {
    Flavour {
        id: 1,
        name: "small".to_string(),
        cpu: 1.0,
        memory: 1024,
    }
}

pub fn sample_instance(id: InstanceId, name: &str) -> Instance {
    Instance {
        id,
        name: name.to_string(),
        image: sample_image(),
        flavour: sample_flavour(),
        account: InstanceAccount {
            username: "alice".to_string(),
            uid: Some(1001),
            gid: Some(100),
            home_path: Some("/home/alice".to_string()),
        },
        compute_id: None,
        status: InstanceStatus::Pending,
        status_message: None,
        updated_at: None,
    }
}

fn pod_with_container(name: &str, phase: &str, ready: bool, state: ContainerState) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "main".to_string(),
                ready,
                state: Some(state),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub fn pod_ready(name: &str) -> Pod {
    pod_with_container(
        name,
        "Running",
        true,
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        },
    )
}

pub fn pod_waiting(name: &str, reason: &str) -> Pod {
    pod_with_container(
        name,
        "Pending",
        false,
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: None,
            }),
            ..Default::default()
        },
    )
}

pub fn node(name: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}
