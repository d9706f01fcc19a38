pub mod cluster;
pub mod instance;

use std::sync::Arc;

use anyhow::{Context, Result};
use cloudlab_orchestrations::{load_helper, InstanceOrchestrator, KubeCluster};

use crate::config::Config;

/// Connect to the cluster and load the deployment helper once for this process
pub async fn connect(config: &Config) -> Result<Arc<InstanceOrchestrator>> {
    let cluster = KubeCluster::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let helper = load_helper(config.orchestrator.helper_path.as_deref());

    tracing::info!(
        namespace = %config.orchestrator.namespace,
        helper = helper.is_some(),
        "Connected to Kubernetes"
    );

    Ok(Arc::new(InstanceOrchestrator::new(
        Arc::new(cluster),
        config.orchestrator.clone(),
        helper,
    )))
}
