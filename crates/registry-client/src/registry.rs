pub mod consul;
pub mod memory;

use crate::error::Result;
use crate::service::{InstanceIdentity, InstanceRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

pub use consul::ConsulDiscoverClient;
pub use memory::InMemoryDiscoverClient;

/// Registration and discovery operations a registry backend provides.
///
/// `register` and `deregister` never fail loudly: the outcome is a bool and
/// the cause of a failure is logged by the implementation.
#[async_trait]
pub trait DiscoverClient: Send + Sync {
    /// Announces `identity` to the registry with a health check on
    /// `health_check_path`. Registering an existing id overwrites it.
    async fn register(
        &self,
        identity: &InstanceIdentity,
        health_check_path: &str,
        meta: &HashMap<String, String>,
    ) -> bool;

    /// Removes the instance. Returns false if the registry did not know it.
    async fn deregister(&self, instance_id: &str) -> bool;

    /// Queries all instances registered under `service_name`.
    async fn try_discover_service(&self, service_name: &str) -> Result<Vec<InstanceRecord>>;

    /// Like [`DiscoverClient::try_discover_service`], but a failing registry
    /// yields an empty list.
    async fn discover_service(&self, service_name: &str) -> Vec<InstanceRecord> {
        match self.try_discover_service(service_name).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("Failed to discover service {}: {}", service_name, e);
                Vec::new()
            }
        }
    }

    /// How often `keep_alive` must be called, if the backend registered a
    /// self-reported check.
    fn keep_alive_interval(&self) -> Option<Duration> {
        None
    }

    async fn keep_alive(&self, _instance_id: &str) -> bool {
        true
    }
}
