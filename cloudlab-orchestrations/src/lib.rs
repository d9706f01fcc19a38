//! Cloudlab Orchestrations - lifecycle management of compute instances on Kubernetes
//!
//! This crate turns lifecycle commands (create, state, start, shutdown, reboot, delete) into
//! cluster operations, serialised per instance.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cloudlab_models::{InstanceCommand, InstanceCommandType};
//! use cloudlab_orchestrations::{
//!     ActionContext, ActionScheduler, InstanceOrchestrator, InstanceStore, KubeCluster,
//!     OrchestratorConfig,
//! };
//!
//! # async fn example(store: Arc<dyn InstanceStore>) -> anyhow::Result<()> {
//! let cluster = Arc::new(KubeCluster::try_default().await?);
//! let orchestrator = Arc::new(InstanceOrchestrator::new(cluster, OrchestratorConfig::default(), None));
//! let scheduler = ActionScheduler::new(ActionContext::new(orchestrator, store));
//!
//! scheduler
//!     .execute(InstanceCommand::new(42, InstanceCommandType::Create))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod helper;
pub mod k8s;
pub mod k8s_client;
pub mod names;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export key types for convenience
pub use actions::{Action, ActionContext, InstanceActionListener, LoggingListener};
pub use config::OrchestratorConfig;
pub use error::{ActionError, ClusterError, HelperError, SpecError, StoreError};
pub use helper::{load_helper, DeploymentHelper, FileDeploymentHelper};
pub use k8s_client::{ClusterApi, KubeCluster};
pub use orchestrator::InstanceOrchestrator;
pub use scheduler::{ActionHandle, ActionScheduler};
pub use store::InstanceStore;
pub use types::{K8sInstance, K8sInstanceState};
