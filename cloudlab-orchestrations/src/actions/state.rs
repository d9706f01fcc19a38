use cloudlab_models::{Instance, InstanceStatus};
use tracing::debug;

use super::{not_provisioned, persist, ActionContext};
use crate::error::ActionError;

pub(super) async fn run(ctx: &ActionContext, mut instance: Instance) -> Result<(), ActionError> {
    let state = match instance.compute_id.as_deref() {
        Some(compute_id) => ctx.orchestrator.refresh(compute_id).await,
        None if instance.status == InstanceStatus::Deleted => {
            debug!("Instance already deleted, nothing to refresh");
            return Ok(());
        }
        None => not_provisioned(),
    };

    persist(ctx, &mut instance, state).await
}
