use std::sync::Arc;

use anyhow::{Context, Result};
use cloudlab_models::{Instance, InstanceCommand, InstanceCommandType, InstanceId};
use cloudlab_orchestrations::{ActionContext, ActionScheduler, InstanceStore};

use crate::commands::connect;
use crate::config::Config;
use crate::store::FileInstanceStore;

pub async fn run_lifecycle(
    config: &Config,
    command_type: InstanceCommandType,
    id: InstanceId,
    output: &str,
) -> Result<()> {
    let orchestrator = connect(config).await?;
    let store = Arc::new(FileInstanceStore::open(&config.store_path).await?);
    let scheduler = ActionScheduler::new(ActionContext::new(orchestrator, store.clone()));

    let instance = execute(&scheduler, store.as_ref(), command_type, id).await?;
    print_instance(&instance, output)
}

pub async fn run_list(config: &Config, output: &str) -> Result<()> {
    let store = FileInstanceStore::open(&config.store_path).await?;
    let instances = store.list().await;

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    println!("{:<6} {:<20} {:<12} {:<30}", "ID", "NAME", "STATUS", "COMPUTE ID");
    println!("{}", "-".repeat(70));
    for instance in &instances {
        println!(
            "{:<6} {:<20} {:<12} {:<30}",
            instance.id,
            instance.name,
            instance.status,
            instance.compute_id.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("{} instance(s) found", instances.len());
    Ok(())
}

/// Run one command through the scheduler and return the instance as persisted afterwards
pub async fn execute(
    scheduler: &ActionScheduler,
    store: &dyn InstanceStore,
    command_type: InstanceCommandType,
    id: InstanceId,
) -> Result<Instance> {
    tracing::info!(instance_id = id, command = %command_type, "Submitting command");

    scheduler
        .execute(InstanceCommand::new(id, command_type))
        .await
        .with_context(|| format!("{} failed for instance {}", command_type, id))?;

    store
        .get_by_id(id)
        .await
        .with_context(|| format!("Failed to read instance {}", id))
}

fn print_instance(instance: &Instance, output: &str) -> Result<()> {
    if output == "json" {
        println!("{}", serde_json::to_string_pretty(instance)?);
    } else {
        print!("{}", render_instance(instance));
    }
    Ok(())
}

fn render_instance(instance: &Instance) -> String {
    let mut lines = vec![
        format!("Instance: {} ({})", instance.name, instance.id),
        "=".repeat(60),
        format!("  Status:      {}", instance.status),
        format!("  Compute ID:  {}", instance.compute_id.as_deref().unwrap_or("-")),
        format!("  Image:       {}", instance.image.reference()),
        format!("  Flavour:     {} ({} cpu, {} MiB)", instance.flavour.name, instance.flavour.cpu, instance.flavour.memory),
    ];
    if let Some(message) = &instance.status_message {
        lines.push(format!("  Message:     {}", message));
    }
    if let Some(updated_at) = instance.updated_at {
        lines.push(format!("  Updated:     {}", updated_at.to_rfc3339()));
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudlab_models::InstanceStatus;
    use cloudlab_orchestrations::mock::{sample_instance, MockCluster};
    use cloudlab_orchestrations::{InstanceOrchestrator, OrchestratorConfig};
    use std::time::Duration;

    async fn scheduler_with_file_store() -> (tempfile::TempDir, Arc<FileInstanceStore>, ActionScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileInstanceStore::open(dir.path().join("instances.yaml")).await.unwrap());
        store.save(&sample_instance(3, "desktop")).await.unwrap();

        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let orchestrator = Arc::new(InstanceOrchestrator::new(Arc::new(MockCluster::new()), config, None));
        let scheduler = ActionScheduler::new(ActionContext::new(orchestrator, store.clone()));
        (dir, store, scheduler)
    }

    #[tokio::test]
    async fn test_execute_returns_persisted_instance() {
        let (_dir, store, scheduler) = scheduler_with_file_store().await;

        let created = execute(&scheduler, store.as_ref(), InstanceCommandType::Create, 3).await.unwrap();
        assert_eq!(created.status, InstanceStatus::Active);
        assert_eq!(created.compute_id.as_deref(), Some("desktop-3"));

        let deleted = execute(&scheduler, store.as_ref(), InstanceCommandType::Delete, 3).await.unwrap();
        assert_eq!(deleted.status, InstanceStatus::Deleted);
    }

    #[tokio::test]
    async fn test_execute_unknown_instance_fails() {
        let (_dir, store, scheduler) = scheduler_with_file_store().await;

        let err = execute(&scheduler, store.as_ref(), InstanceCommandType::Start, 99).await.unwrap_err();
        assert!(err.to_string().contains("instance 99"));
    }

    #[test]
    fn test_render_instance_includes_message() {
        let mut instance = sample_instance(5, "desktop");
        instance.set_status(InstanceStatus::Error, Some("image could not be pulled".to_string()));

        let rendered = render_instance(&instance);
        assert!(rendered.contains("Status:      ERROR"));
        assert!(rendered.contains("Compute ID:  -"));
        assert!(rendered.contains("Message:     image could not be pulled"));
    }
}
