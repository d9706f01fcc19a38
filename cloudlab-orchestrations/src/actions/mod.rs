//! Lifecycle actions
//!
//! An [`Action`] is one requested transition for one instance. It is built by the
//! [`ActionScheduler`](crate::scheduler::ActionScheduler), run exactly once and then dropped.
//! Every action reads the instance from the store when it starts, persists a transitional status,
//! does its cluster work through the [`InstanceOrchestrator`] and persists the outcome. Cluster
//! failures end up as a persisted ERROR or UNKNOWN status; only store failures surface as errors.

mod create;
mod delete;
mod reboot;
mod shutdown;
mod start;
mod state;

use std::sync::Arc;

use cloudlab_models::{Instance, InstanceCommand, InstanceCommandType, InstanceId, InstanceStatus};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::ActionError;
use crate::names::actions;
use crate::orchestrator::InstanceOrchestrator;
use crate::store::InstanceStore;
use crate::types::K8sInstanceState;

/// Collaborators shared by every action
#[derive(Clone)]
pub struct ActionContext {
    pub orchestrator: Arc<InstanceOrchestrator>,
    pub store: Arc<dyn InstanceStore>,
}

impl ActionContext {
    pub fn new(orchestrator: Arc<InstanceOrchestrator>, store: Arc<dyn InstanceStore>) -> Self {
        Self { orchestrator, store }
    }
}

#[derive(Debug, Clone)]
pub struct Action {
    id: Uuid,
    command: InstanceCommand,
}

impl Action {
    pub fn new(command: InstanceCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.command.instance_id
    }

    pub fn command_type(&self) -> InstanceCommandType {
        self.command.command_type
    }

    pub fn name(&self) -> &'static str {
        match self.command.command_type {
            InstanceCommandType::Create => actions::CREATE,
            InstanceCommandType::State => actions::STATE,
            InstanceCommandType::Start => actions::START,
            InstanceCommandType::Shutdown => actions::SHUTDOWN,
            InstanceCommandType::Reboot => actions::REBOOT,
            InstanceCommandType::Delete => actions::DELETE,
        }
    }

    pub async fn run(&self, ctx: &ActionContext) -> Result<(), ActionError> {
        let span = info_span!(
            "action",
            action = self.name(),
            action_id = %self.id,
            instance_id = self.instance_id()
        );

        async move {
            let instance = ctx.store.get_by_id(self.instance_id()).await?;
            debug!(status = %instance.status, compute_id = ?instance.compute_id, "Action started");

            match self.command.command_type {
                InstanceCommandType::Create => create::run(ctx, instance).await,
                InstanceCommandType::State => state::run(ctx, instance).await,
                InstanceCommandType::Start => start::run(ctx, instance).await,
                InstanceCommandType::Shutdown => shutdown::run(ctx, instance).await,
                InstanceCommandType::Reboot => reboot::run(ctx, instance).await,
                InstanceCommandType::Delete => delete::run(ctx, instance).await,
            }
        }
        .instrument(span)
        .await
    }
}

/// Observer notified after every completed action
pub trait InstanceActionListener: Send + Sync {
    fn on_terminated(&self, action: &Action);
    fn on_error(&self, action: &Action, error: &ActionError);
}

/// Default observer writing outcomes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl InstanceActionListener for LoggingListener {
    fn on_terminated(&self, action: &Action) {
        info!(
            action = action.name(),
            action_id = %action.id(),
            instance_id = action.instance_id(),
            "Action terminated"
        );
    }

    fn on_error(&self, action: &Action, error: &ActionError) {
        error!(
            action = action.name(),
            action_id = %action.id(),
            instance_id = action.instance_id(),
            error = %error,
            "Action failed"
        );
    }
}

async fn mark(ctx: &ActionContext, instance: &mut Instance, status: InstanceStatus) -> Result<(), ActionError> {
    instance.set_status(status, None);
    ctx.store.save(instance).await?;
    Ok(())
}

async fn persist(ctx: &ActionContext, instance: &mut Instance, state: K8sInstanceState) -> Result<(), ActionError> {
    info!(status = %state.status, message = ?state.message, "Persisting instance status");
    instance.set_status(state.status, state.message);
    ctx.store.save(instance).await?;
    Ok(())
}

/// ERROR state for commands that need a provisioned workload
fn not_provisioned() -> K8sInstanceState {
    K8sInstanceState::error("instance has no provisioned workload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::error::StoreError;
    use crate::mock::{sample_instance, MemoryInstanceStore, MockCluster};
    use cloudlab_models::ImageVolume;
    use std::time::Duration;

    struct Fixture {
        cluster: Arc<MockCluster>,
        store: Arc<MemoryInstanceStore>,
        ctx: ActionContext,
    }

    fn fixture(instances: Vec<Instance>) -> Fixture {
        let cluster = Arc::new(MockCluster::new());
        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_secs(2),
            container_creating_timeout: Duration::from_millis(40),
            ..Default::default()
        };
        let orchestrator = Arc::new(InstanceOrchestrator::new(cluster.clone(), config, None));
        let store = Arc::new(MemoryInstanceStore::with_instances(instances));
        let ctx = ActionContext::new(orchestrator, store.clone());
        Fixture { cluster, store, ctx }
    }

    async fn run(fixture: &Fixture, id: InstanceId, command_type: InstanceCommandType) -> Result<(), ActionError> {
        Action::new(InstanceCommand::new(id, command_type)).run(&fixture.ctx).await
    }

    #[test]
    fn test_action_names_follow_command_type() {
        let action = Action::new(InstanceCommand::new(1, InstanceCommandType::Reboot));
        assert_eq!(action.name(), actions::REBOOT);
        assert_eq!(action.instance_id(), 1);
    }

    #[tokio::test]
    async fn test_create_persists_building_then_active() {
        let fixture = fixture(vec![sample_instance(3, "desktop")]);

        run(&fixture, 3, InstanceCommandType::Create).await.unwrap();

        let instance = fixture.store.get(3).unwrap();
        assert_eq!(instance.status, InstanceStatus::Active);
        assert_eq!(instance.compute_id.as_deref(), Some("desktop-3"));
        assert_eq!(instance.status_message, None);
        assert_eq!(
            fixture.store.status_history(3),
            vec![InstanceStatus::Building, InstanceStatus::Active]
        );
    }

    #[tokio::test]
    async fn test_create_with_service_error_keeps_compute_id() {
        let fixture = fixture(vec![sample_instance(999, "endpoint-error")]);

        run(&fixture, 999, InstanceCommandType::Create).await.unwrap();

        let instance = fixture.store.get(999).unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert_eq!(instance.compute_id.as_deref(), Some("endpoint-error-999"));
        assert!(instance.status_message.is_some());
    }

    #[tokio::test]
    async fn test_create_with_invalid_spec_has_no_compute_id() {
        let mut instance = sample_instance(4, "desktop");
        instance.image.volumes = vec![ImageVolume {
            name: "data".to_string(),
            path: "/data".to_string(),
            read_only: false,
        }];
        let fixture = fixture(vec![instance]);

        run(&fixture, 4, InstanceCommandType::Create).await.unwrap();

        let instance = fixture.store.get(4).unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert_eq!(instance.compute_id, None);
        assert_eq!(fixture.cluster.deployment_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_start_and_reboot() {
        let fixture = fixture(vec![sample_instance(3, "desktop")]);
        run(&fixture, 3, InstanceCommandType::Create).await.unwrap();

        run(&fixture, 3, InstanceCommandType::Shutdown).await.unwrap();
        assert_eq!(fixture.store.get(3).unwrap().status, InstanceStatus::Stopped);

        run(&fixture, 3, InstanceCommandType::Start).await.unwrap();
        assert_eq!(fixture.store.get(3).unwrap().status, InstanceStatus::Active);

        run(&fixture, 3, InstanceCommandType::Reboot).await.unwrap();
        assert_eq!(fixture.store.get(3).unwrap().status, InstanceStatus::Active);

        assert_eq!(
            fixture.store.status_history(3),
            vec![
                InstanceStatus::Building,
                InstanceStatus::Active,
                InstanceStatus::Stopping,
                InstanceStatus::Stopped,
                InstanceStatus::Starting,
                InstanceStatus::Active,
                InstanceStatus::Rebooting,
                InstanceStatus::Active,
            ]
        );
        let scales: Vec<String> = fixture
            .cluster
            .operations()
            .into_iter()
            .filter(|op| op.starts_with("scale"))
            .collect();
        assert_eq!(scales, vec!["scale desktop-3 0", "scale desktop-3 1", "scale desktop-3 0", "scale desktop-3 1"]);
    }

    #[tokio::test]
    async fn test_start_without_workload_is_error() {
        let fixture = fixture(vec![sample_instance(5, "desktop")]);

        run(&fixture, 5, InstanceCommandType::Start).await.unwrap();

        let instance = fixture.store.get(5).unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert!(fixture.cluster.operations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_workload_then_marks_deleted() {
        let fixture = fixture(vec![sample_instance(3, "desktop")]);
        run(&fixture, 3, InstanceCommandType::Create).await.unwrap();

        run(&fixture, 3, InstanceCommandType::Delete).await.unwrap();

        let instance = fixture.store.get(3).unwrap();
        assert_eq!(instance.status, InstanceStatus::Deleted);
        assert_eq!(instance.compute_id, None);
        assert_eq!(fixture.cluster.deployment_count(), 0);
        assert_eq!(fixture.cluster.service_count(), 0);
        assert!(fixture
            .store
            .status_history(3)
            .ends_with(&[InstanceStatus::Deleting, InstanceStatus::Deleted]));
    }

    #[tokio::test]
    async fn test_delete_without_workload_is_deleted() {
        let fixture = fixture(vec![sample_instance(6, "desktop")]);
        run(&fixture, 6, InstanceCommandType::Delete).await.unwrap();
        assert_eq!(fixture.store.get(6).unwrap().status, InstanceStatus::Deleted);
    }

    #[tokio::test]
    async fn test_delete_on_unreachable_cluster_is_error() {
        let fixture = fixture(vec![sample_instance(3, "desktop")]);
        run(&fixture, 3, InstanceCommandType::Create).await.unwrap();
        fixture.cluster.set_unavailable(true);

        run(&fixture, 3, InstanceCommandType::Delete).await.unwrap();

        let instance = fixture.store.get(3).unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert_eq!(instance.compute_id.as_deref(), Some("desktop-3"));
    }

    #[tokio::test]
    async fn test_state_reads_back_cluster_status() {
        let fixture = fixture(vec![sample_instance(3, "desktop")]);
        run(&fixture, 3, InstanceCommandType::Create).await.unwrap();
        fixture.ctx.orchestrator.shutdown("desktop-3").await;

        run(&fixture, 3, InstanceCommandType::State).await.unwrap();
        assert_eq!(fixture.store.get(3).unwrap().status, InstanceStatus::Stopped);

        fixture.cluster.set_unavailable(true);
        run(&fixture, 3, InstanceCommandType::State).await.unwrap();
        assert_eq!(fixture.store.get(3).unwrap().status, InstanceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_state_keeps_container_creating_timeout_as_error() {
        let fixture = fixture(vec![sample_instance(9, "pod-container-creating-timeout")]);
        run(&fixture, 9, InstanceCommandType::Create).await.unwrap();
        assert_eq!(fixture.store.get(9).unwrap().status, InstanceStatus::Error);

        run(&fixture, 9, InstanceCommandType::State).await.unwrap();

        let instance = fixture.store.get(9).unwrap();
        assert_eq!(instance.status, InstanceStatus::Error);
        assert!(instance.status_message.unwrap().contains("ContainerCreating"));
        assert_eq!(
            fixture.store.status_history(9),
            vec![InstanceStatus::Building, InstanceStatus::Error, InstanceStatus::Error]
        );
    }

    #[tokio::test]
    async fn test_state_of_deleted_instance_is_left_alone() {
        let mut instance = sample_instance(8, "desktop");
        instance.status = InstanceStatus::Deleted;
        let fixture = fixture(vec![instance]);

        run(&fixture, 8, InstanceCommandType::State).await.unwrap();
        assert_eq!(fixture.store.get(8).unwrap().status, InstanceStatus::Deleted);
    }

    #[tokio::test]
    async fn test_store_failures_propagate() {
        let fixture = fixture(vec![sample_instance(3, "desktop")]);

        let missing = run(&fixture, 42, InstanceCommandType::Create).await;
        assert_eq!(missing, Err(ActionError::Store(StoreError::NotFound(42))));

        fixture.store.set_fail_saves(true);
        let result = run(&fixture, 3, InstanceCommandType::Create).await;
        assert!(matches!(result, Err(ActionError::Store(StoreError::Backend(_)))));
        assert_eq!(fixture.cluster.deployment_count(), 0);
    }
}
