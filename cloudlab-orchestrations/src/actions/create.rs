use cloudlab_models::{Instance, InstanceStatus};
use tracing::info;

use super::{mark, persist, ActionContext};
use crate::error::ActionError;

/// Provision the workload and persist its computeId and status. Never retries.
pub(super) async fn run(ctx: &ActionContext, mut instance: Instance) -> Result<(), ActionError> {
    mark(ctx, &mut instance, InstanceStatus::Building).await?;

    let k8s_instance = ctx.orchestrator.create(&instance).await;
    if let Some(compute_id) = k8s_instance.compute_id() {
        instance.compute_id = Some(compute_id.to_string());
    }
    info!(compute_id = ?instance.compute_id, status = %k8s_instance.status(), "Instance provisioned");

    persist(ctx, &mut instance, k8s_instance.state).await
}
