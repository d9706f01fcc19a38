//! Runtime projection of an instance onto the cluster

use chrono::{DateTime, Utc};
use cloudlab_models::InstanceStatus;
use serde::{Deserialize, Serialize};

use crate::k8s::{DeploymentHandle, NamespaceHandle, PodHealth, ServiceHandle};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct K8sInstanceState {
    pub status: InstanceStatus,
    /// Diagnostic explaining the status, if any
    pub message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl K8sInstanceState {
    pub fn new(status: InstanceStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            observed_at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(InstanceStatus::Error, Some(message.into()))
    }

    /// Instance status for an observed pod health
    pub fn from_health(health: PodHealth) -> Self {
        match health {
            PodHealth::Running => Self::new(InstanceStatus::Active, None),
            PodHealth::Pending => Self::new(InstanceStatus::Building, None),
            PodHealth::Unknown => Self::new(
                InstanceStatus::Unknown,
                Some("pod state could not be determined".to_string()),
            ),
            PodHealth::CrashLoopBackOff => Self::error("pod is in CrashLoopBackOff"),
            PodHealth::ImagePullError => Self::error("image could not be pulled"),
            PodHealth::ContainerCreatingTimeout => {
                Self::error("pod stayed in ContainerCreating past the timeout")
            }
        }
    }
}

/// Namespace, deployment and service of one instance, plus its derived state.
///
/// Never persisted: every read recomputes it from the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct K8sInstance {
    pub namespace: Option<NamespaceHandle>,
    pub deployment: Option<DeploymentHandle>,
    pub service: Option<ServiceHandle>,
    pub state: K8sInstanceState,
}

impl K8sInstance {
    /// An instance that never reached the cluster
    pub fn failed(namespace: Option<NamespaceHandle>, message: impl Into<String>) -> Self {
        Self {
            namespace,
            deployment: None,
            service: None,
            state: K8sInstanceState::error(message),
        }
    }

    /// Cluster identifier, available once the deployment exists
    pub fn compute_id(&self) -> Option<&str> {
        self.deployment.as_ref().map(|deployment| deployment.name.as_str())
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_health_maps_to_error() {
        for health in [
            PodHealth::CrashLoopBackOff,
            PodHealth::ImagePullError,
            PodHealth::ContainerCreatingTimeout,
        ] {
            let state = K8sInstanceState::from_health(health);
            assert_eq!(state.status, InstanceStatus::Error);
            assert!(state.message.is_some());
        }
    }

    #[test]
    fn test_non_terminal_health_mapping() {
        assert_eq!(K8sInstanceState::from_health(PodHealth::Running).status, InstanceStatus::Active);
        assert_eq!(K8sInstanceState::from_health(PodHealth::Pending).status, InstanceStatus::Building);
        assert_eq!(K8sInstanceState::from_health(PodHealth::Unknown).status, InstanceStatus::Unknown);
    }

    #[test]
    fn test_failed_instance_has_no_compute_id() {
        let instance = K8sInstance::failed(None, "volumes required");
        assert_eq!(instance.compute_id(), None);
        assert_eq!(instance.status(), InstanceStatus::Error);
    }
}
