use cloudlab_models::{Instance, InstanceStatus};

use super::{mark, not_provisioned, persist, ActionContext};
use crate::error::ActionError;

pub(super) async fn run(ctx: &ActionContext, mut instance: Instance) -> Result<(), ActionError> {
    mark(ctx, &mut instance, InstanceStatus::Starting).await?;

    let state = match instance.compute_id.as_deref() {
        Some(compute_id) => ctx.orchestrator.start(compute_id).await,
        None => not_provisioned(),
    };

    persist(ctx, &mut instance, state).await
}
