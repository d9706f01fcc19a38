use cloudlab_models::{Instance, InstanceStatus};
use tracing::warn;

use super::{mark, not_provisioned, persist, ActionContext};
use crate::error::ActionError;

/// Shutdown followed by start. A failed shutdown is persisted and the start is skipped.
pub(super) async fn run(ctx: &ActionContext, mut instance: Instance) -> Result<(), ActionError> {
    mark(ctx, &mut instance, InstanceStatus::Rebooting).await?;

    let Some(compute_id) = instance.compute_id.clone() else {
        return persist(ctx, &mut instance, not_provisioned()).await;
    };

    let stopped = ctx.orchestrator.shutdown(&compute_id).await;
    if stopped.status != InstanceStatus::Stopped {
        warn!(compute_id = %compute_id, "Reboot aborted, shutdown did not complete");
        return persist(ctx, &mut instance, stopped).await;
    }

    let state = ctx.orchestrator.start(&compute_id).await;
    persist(ctx, &mut instance, state).await
}
