use std::collections::BTreeMap;
use std::sync::Arc;

use cloudlab_models::Image;
use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;
use tracing::info;

use super::{render_manifest, required_name};
use crate::error::ClusterError;
use crate::k8s_client::ClusterApi;

const TEMPLATE: &str = include_str!("../templates/service.yaml");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicePortRequest {
    pub name: String,
    pub port: u16,
}

/// Service exposing the pods labelled `app=<name>`.
///
/// Without ports the service is headless, which still resolves the pods by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRequest {
    pub name: String,
    pub service_type: String,
    pub ports: Vec<ServicePortRequest>,
}

impl ServiceRequest {
    /// One port per image protocol, named like the container ports
    pub fn for_image(name: &str, image: &Image, service_type: &str) -> Self {
        Self {
            name: name.to_string(),
            service_type: service_type.to_string(),
            ports: image
                .protocols
                .iter()
                .map(|protocol| ServicePortRequest {
                    name: protocol.protocol.name.to_lowercase(),
                    port: protocol.get_port(),
                })
                .collect(),
        }
    }

    fn manifest(&self) -> Result<Service, ClusterError> {
        let mut context = TeraContext::new();
        context.insert("name", &self.name);
        context.insert("service_type", &self.service_type);
        context.insert("ports", &self.ports);
        render_manifest("service", TEMPLATE, &context)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHandle {
    pub name: String,
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<i32>,
    pub cluster_ip: Option<String>,
}

impl ServiceHandle {
    fn from_object(service: Service, namespace: &str) -> Result<Self, ClusterError> {
        let name = required_name("Service", &service.metadata)?;
        let spec = service.spec.unwrap_or_default();
        Ok(Self {
            name,
            namespace: service.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
            selector: spec.selector.unwrap_or_default(),
            ports: spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|port| port.port)
                .collect(),
            cluster_ip: spec.cluster_ip,
        })
    }
}

#[derive(Clone)]
pub struct ServiceManager {
    cluster: Arc<dyn ClusterApi>,
}

impl ServiceManager {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn create(&self, namespace: &str, request: &ServiceRequest) -> Result<ServiceHandle, ClusterError> {
        let service = self
            .cluster
            .create_service(namespace, &request.manifest()?)
            .await?;
        info!(service = %request.name, namespace, "Service created");
        ServiceHandle::from_object(service, namespace)
    }

    pub async fn get(&self, name: &str, namespace: &str) -> Result<Option<ServiceHandle>, ClusterError> {
        self.cluster
            .get_service(namespace, name)
            .await?
            .map(|service| ServiceHandle::from_object(service, namespace))
            .transpose()
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<bool, ClusterError> {
        self.cluster.delete_service(namespace, name).await
    }
}
