//! Orchestrator settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Namespace holding every instance workload
    pub namespace: String,
    /// Value of the `owner` label stamped on deployments
    pub owner_label: String,
    pub image_pull_secret: Option<String>,
    /// `ClusterIP`, `NodePort` or `LoadBalancer`
    pub service_type: String,
    /// Delay between two pod health observations
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    /// How long create/start wait for the pod before settling on the last observed health
    #[serde(with = "secs")]
    pub ready_timeout: Duration,
    /// Time a pod may stay in ContainerCreating before it is considered failed
    #[serde(with = "secs")]
    pub container_creating_timeout: Duration,
    /// YAML file describing per-deployment volumes, env vars and run-as uid
    pub helper_path: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "cloudlab".to_string(),
            owner_label: "cloudlab".to_string(),
            image_pull_secret: None,
            service_type: "ClusterIP".to_string(),
            poll_interval: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(180),
            container_creating_timeout: Duration::from_secs(120),
            helper_path: None,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}
