use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;

use crate::error::ClusterError;
use crate::k8s_client::ClusterApi;

#[derive(Clone)]
pub struct NodeService {
    cluster: Arc<dyn ClusterApi>,
}

impl NodeService {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Names of the nodes currently reporting Ready
    pub async fn list_ready(&self) -> Result<BTreeSet<String>, ClusterError> {
        let nodes = self.cluster.list_nodes().await?;
        Ok(nodes
            .into_iter()
            .filter(is_ready)
            .filter_map(|node| node.metadata.name)
            .collect())
    }
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
        .unwrap_or(false)
}
