//! Instance store backed by a YAML file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use cloudlab_models::{Instance, InstanceId};
use cloudlab_orchestrations::{InstanceStore, StoreError};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Keeps every instance in memory and rewrites the whole file on each save
pub struct FileInstanceStore {
    path: PathBuf,
    instances: Mutex<BTreeMap<InstanceId, Instance>>,
}

impl FileInstanceStore {
    /// Load the store, starting empty when the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let instances = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse(&content)
                .with_context(|| format!("Failed to parse instance store {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Instance store not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read instance store {}", path.display()));
            }
        };

        debug!(path = %path.display(), instances = instances.len(), "Instance store loaded");
        Ok(Self {
            path,
            instances: Mutex::new(instances),
        })
    }

    pub async fn list(&self) -> Vec<Instance> {
        self.instances.lock().await.values().cloned().collect()
    }
}

fn parse(content: &str) -> Result<BTreeMap<InstanceId, Instance>, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let instances: Vec<Instance> = serde_yaml::from_str(content)?;
    Ok(instances.into_iter().map(|instance| (instance.id, instance)).collect())
}

#[async_trait]
impl InstanceStore for FileInstanceStore {
    async fn get_by_id(&self, id: InstanceId) -> Result<Instance, StoreError> {
        self.instances
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut instances = self.instances.lock().await;

        let mut stamped = instance.clone();
        stamped.updated_at = Some(Utc::now());
        let mut updated = instances.clone();
        updated.insert(stamped.id, stamped);

        // Memory only moves once the file holds the new content
        let all: Vec<&Instance> = updated.values().collect();
        let content = serde_yaml::to_string(&all).map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| StoreError::Backend(format!("{}: {}", self.path.display(), e)))?;
        *instances = updated;

        debug!(instance_id = instance.id, status = %instance.status, "Instance saved");
        Ok(())
    }
}
