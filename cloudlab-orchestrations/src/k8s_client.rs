//! Kubernetes client seam
//!
//! [`ClusterApi`] is the only surface that speaks to the API server. Everything above it works
//! with typed `k8s-openapi` objects and never sees transport details. Missing resources are
//! reported as `None` / `false`, not as errors.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

use crate::error::ClusterError;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError>;
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError>;
    async fn delete_namespace(&self, name: &str) -> Result<bool, ClusterError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<Deployment, ClusterError>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;
}

/// [`ClusterApi`] backed by a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn not_found_as_none<K>(result: Result<K, kube::Error>) -> Result<Option<K>, ClusterError> {
    match result {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
        Err(e) => Err(api_error(e)),
    }
}

fn not_found_as_false<K>(result: Result<K, kube::Error>) -> Result<bool, ClusterError> {
    match result {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
        Err(e) => Err(api_error(e)),
    }
}

fn api_error(error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(response) => ClusterError::Api {
            code: response.code,
            message: response.message,
        },
        other => ClusterError::Transport(other),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces
            .create(&PostParams::default(), namespace)
            .await
            .map_err(api_error)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        not_found_as_none(namespaces.get(name).await)
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        not_found_as_false(namespaces.delete(name, &DeleteParams::default()).await)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        self.namespaced::<Deployment>(namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(api_error)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        not_found_as_none(self.namespaced::<Deployment>(namespace).get(name).await)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let params = DeleteParams::foreground();
        not_found_as_false(self.namespaced::<Deployment>(namespace).delete(name, &params).await)
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<Deployment, ClusterError> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.namespaced::<Deployment>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(api_error)
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        self.namespaced::<Service>(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(api_error)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        not_found_as_none(self.namespaced::<Service>(namespace).get(name).await)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        not_found_as_false(
            self.namespaced::<Service>(namespace)
                .delete(name, &DeleteParams::default())
                .await,
        )
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let pods = self
            .namespaced::<Pod>(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(api_error)?;
        Ok(pods.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node_list = nodes.list(&ListParams::default()).await.map_err(api_error)?;
        Ok(node_list.items)
    }
}
