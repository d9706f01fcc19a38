//! Deployment manifest for an instance
//!
//! Built as a typed `apps/v1` Deployment from the instance image, flavour and account, with the
//! optional [`DeploymentHelper`] layered over the image defaults. No I/O happens here.

use std::collections::BTreeMap;
use std::sync::Arc;

use cloudlab_models::{Flavour, Image, InstanceAccount};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec as K8sDeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar as K8sEnvVar, LocalObjectReference, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

use crate::error::SpecError;
use crate::helper::{DeploymentHelper, VolumeData};
use crate::names::{APP_LABEL, OWNER_LABEL};

static VOLUME_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("volume name pattern compiles"));

/// Whether `name` is acceptable as a Kubernetes volume name
pub fn is_valid_volume_name(name: &str) -> bool {
    VOLUME_NAME.is_match(name)
}

/// A built deployment manifest, immutable once constructed
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    name: String,
    deployment: Deployment,
}

impl DeploymentSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn into_deployment(self) -> Deployment {
        self.deployment
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.deployment.spec.as_ref()?.template.spec.as_ref()
    }

    /// The single workload container
    pub fn container(&self) -> Option<&Container> {
        self.pod_spec()?.containers.first()
    }

    pub fn volumes(&self) -> &[Volume] {
        self.pod_spec()
            .and_then(|spec| spec.volumes.as_deref())
            .unwrap_or(&[])
    }

    pub fn volume_mounts(&self) -> &[VolumeMount] {
        self.container()
            .and_then(|container| container.volume_mounts.as_deref())
            .unwrap_or(&[])
    }

    /// Labels stamped on the pods, which the service selector must match
    pub fn pod_template_labels(&self) -> BTreeMap<String, String> {
        self.deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|metadata| metadata.labels.clone())
            .unwrap_or_default()
    }

    /// Check volume consistency. Only relevant when the container mounts volumes.
    ///
    /// Checked in order: volume names, a volume for every mount, and volumes being declared at
    /// all. An empty volume list is declared, so its mounts are reported as missing volumes.
    pub fn validate(&self) -> Result<(), SpecError> {
        let mounts = self.volume_mounts();
        if mounts.is_empty() {
            return Ok(());
        }

        let Some(volumes) = self.pod_spec().and_then(|spec| spec.volumes.as_deref()) else {
            return Err(SpecError::VolumesRequired);
        };

        if let Some(volume) = volumes.iter().find(|volume| !is_valid_volume_name(&volume.name)) {
            return Err(SpecError::InvalidVolumeName(volume.name.clone()));
        }

        if let Some(mount) = mounts
            .iter()
            .find(|mount| !volumes.iter().any(|volume| volume.name == mount.name))
        {
            return Err(SpecError::MissingVolumeForMount(mount.name.clone()));
        }

        Ok(())
    }

    /// Same as [`validate`](Self::validate), logging the reason on failure
    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(e) => {
                error!(deployment = %self.name, "Kubernetes deployment request rejected: {}", e);
                false
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct DeploymentSpecBuilder {
    owner_label: String,
    image_pull_secret: Option<String>,
    helper: Option<Arc<dyn DeploymentHelper>>,
}

impl DeploymentSpecBuilder {
    pub fn new(owner_label: impl Into<String>) -> Self {
        Self {
            owner_label: owner_label.into(),
            image_pull_secret: None,
            helper: None,
        }
    }

    pub fn with_image_pull_secret(mut self, secret: Option<String>) -> Self {
        self.image_pull_secret = secret;
        self
    }

    pub fn with_helper(mut self, helper: Option<Arc<dyn DeploymentHelper>>) -> Self {
        self.helper = helper;
        self
    }

    pub fn build(
        &self,
        name: &str,
        image: &Image,
        flavour: &Flavour,
        account: &InstanceAccount,
    ) -> DeploymentSpec {
        let helper_volumes = self
            .helper
            .as_ref()
            .and_then(|helper| helper.volumes(image, account));

        let app_labels = BTreeMap::from([(APP_LABEL.to_string(), name.to_string())]);
        let mut labels = app_labels.clone();
        labels.insert(OWNER_LABEL.to_string(), self.owner_label.clone());

        let container = Container {
            name: name.to_string(),
            image: Some(image.reference()),
            ports: Some(container_ports(image)),
            command: image.command.as_ref().map(|command| vec![command.clone()]),
            args: image
                .args
                .as_ref()
                .map(|args| args.split(',').map(str::to_string).collect()),
            env: Some(self.env_vars(image, account)),
            volume_mounts: volume_mounts(image, helper_volumes.as_deref()),
            security_context: self.security_context(image, account),
            resources: Some(resources(flavour)),
            ..Default::default()
        };

        let volumes = helper_volumes.map(|volumes| {
            volumes
                .into_iter()
                .map(|data| Volume {
                    name: data.name,
                    ..data.volume
                })
                .collect()
        });

        let deployment = Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(K8sDeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(app_labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(app_labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        image_pull_secrets: self.image_pull_secret.as_ref().map(|secret| {
                            vec![LocalObjectReference { name: secret.clone() }]
                        }),
                        volumes,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        DeploymentSpec {
            name: name.to_string(),
            deployment,
        }
    }

    /// Image env vars overlaid by helper env vars, first-insertion ordered
    fn env_vars(&self, image: &Image, account: &InstanceAccount) -> Vec<K8sEnvVar> {
        let mut env_vars: Vec<(String, String)> = Vec::new();
        let mut upsert = |name: &str, value: &str| {
            match env_vars.iter_mut().find(|(existing, _)| existing == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => env_vars.push((name.to_string(), value.to_string())),
            }
        };

        for env_var in &image.env_vars {
            upsert(&env_var.name, &env_var.value);
        }
        if let Some(helper_env_vars) = self
            .helper
            .as_ref()
            .and_then(|helper| helper.env_vars(image, account))
        {
            for env_var in &helper_env_vars {
                upsert(&env_var.name, &env_var.value);
            }
        }

        env_vars
            .into_iter()
            .map(|(name, value)| K8sEnvVar {
                name,
                value: Some(value),
                ..Default::default()
            })
            .collect()
    }

    fn security_context(&self, image: &Image, account: &InstanceAccount) -> Option<SecurityContext> {
        let helper_uid = self
            .helper
            .as_ref()
            .and_then(|helper| helper.run_as_uid(image, account));

        helper_uid.or(image.run_as_uid).map(|uid| SecurityContext {
            run_as_user: Some(uid),
            ..Default::default()
        })
    }
}

fn container_ports(image: &Image) -> Vec<ContainerPort> {
    image
        .protocols
        .iter()
        .map(|image_protocol| ContainerPort {
            name: Some(image_protocol.protocol.name.to_lowercase()),
            container_port: i32::from(image_protocol.get_port()),
            ..Default::default()
        })
        .collect()
}

fn volume_mounts(image: &Image, helper_volumes: Option<&[VolumeData]>) -> Option<Vec<VolumeMount>> {
    if image.volumes.is_empty() {
        return None;
    }

    let mut mounts: Vec<VolumeMount> = image
        .volumes
        .iter()
        .map(|volume| VolumeMount {
            mount_path: volume.path.clone(),
            name: volume.name.clone(),
            read_only: Some(volume.read_only),
            ..Default::default()
        })
        .collect();

    for data in helper_volumes.unwrap_or(&[]) {
        let Some(overrides) = &data.volume_mount else {
            continue;
        };
        let Some(mount) = mounts.iter_mut().find(|mount| mount.name == data.name) else {
            continue;
        };
        if let Some(path) = overrides.mount_path.as_ref().filter(|path| !path.is_empty()) {
            mount.mount_path = path.clone();
        }
        // The helper can only tighten a mount to read-only
        if overrides.read_only == Some(true) {
            mount.read_only = Some(true);
        }
    }

    Some(mounts)
}

/// Limits equal requests: no over-commit
fn resources(flavour: &Flavour) -> ResourceRequirements {
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(flavour.cpu.to_string())),
        ("memory".to_string(), Quantity(format!("{}Mi", flavour.memory))),
    ]);
    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}
