use cloudlab_models::{Instance, InstanceStatus};
use tracing::{debug, info};

use super::{mark, persist, ActionContext};
use crate::error::ActionError;
use crate::types::K8sInstanceState;

/// Remove cluster resources, and only then tell the store the instance is gone.
pub(super) async fn run(ctx: &ActionContext, mut instance: Instance) -> Result<(), ActionError> {
    mark(ctx, &mut instance, InstanceStatus::Deleting).await?;

    if let Some(compute_id) = instance.compute_id.clone() {
        let namespace = ctx.orchestrator.namespace();
        if !ctx.orchestrator.delete(&compute_id, namespace).await {
            let state = K8sInstanceState::error("cluster resources could not be removed");
            return persist(ctx, &mut instance, state).await;
        }
        info!(compute_id = %compute_id, "Cluster resources removed");
        instance.compute_id = None;
    } else {
        debug!("No workload provisioned, nothing to remove");
    }

    mark(ctx, &mut instance, InstanceStatus::Deleted).await
}
