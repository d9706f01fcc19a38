//! Instance persistence seam
//!
//! Storage is owned elsewhere. Actions read the instance when they start running and write back
//! its computeId and status when they finish.

use async_trait::async_trait;
use cloudlab_models::{Instance, InstanceId};

use crate::error::StoreError;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_by_id(&self, id: InstanceId) -> Result<Instance, StoreError>;
    async fn save(&self, instance: &Instance) -> Result<(), StoreError>;
}
