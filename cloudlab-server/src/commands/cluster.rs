use anyhow::Result;
use cloudlab_orchestrations::K8sInstance;

use crate::commands::connect;
use crate::config::Config;

pub async fn run_get(config: &Config, compute_id: &str, output: &str) -> Result<()> {
    let orchestrator = connect(config).await?;

    let Some(instance) = orchestrator.get_by_compute_id(compute_id).await? else {
        anyhow::bail!("Workload '{}' not found in namespace {}", compute_id, orchestrator.namespace());
    };

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&instance)?);
    } else {
        print!("{}", render_workload(compute_id, &instance));
    }
    Ok(())
}

pub async fn run_nodes(config: &Config, output: &str) -> Result<()> {
    let orchestrator = connect(config).await?;
    let nodes = orchestrator.node_service().list_ready().await?;

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    } else {
        for node in &nodes {
            println!("{}", node);
        }
        println!();
        println!("{} ready node(s)", nodes.len());
    }
    Ok(())
}

fn render_workload(compute_id: &str, instance: &K8sInstance) -> String {
    let mut lines = vec![
        format!("Workload: {}", compute_id),
        "=".repeat(60),
        format!("  Status:      {}", instance.status()),
    ];
    if let Some(message) = &instance.state.message {
        lines.push(format!("  Message:     {}", message));
    }
    if let Some(namespace) = &instance.namespace {
        lines.push(format!("  Namespace:   {}", namespace.name));
    }
    if let Some(deployment) = &instance.deployment {
        lines.push(format!(
            "  Replicas:    {}/{} ready",
            deployment.ready_replicas, deployment.replicas
        ));
    }
    match &instance.service {
        Some(service) => {
            let ports: Vec<String> = service.ports.iter().map(ToString::to_string).collect();
            lines.push(format!("  Cluster IP:  {}", service.cluster_ip.as_deref().unwrap_or("-")));
            lines.push(format!("  Ports:       {}", ports.join(", ")));
        }
        None => lines.push("  Service:     missing".to_string()),
    }
    lines.push(format!("  Observed:    {}", instance.state.observed_at.to_rfc3339()));
    lines.join("\n") + "\n"
}
