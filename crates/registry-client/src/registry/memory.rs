//! Registry backend that keeps instances in process memory.
//!
//! Used for tests and for running a service without a registry agent.

use super::DiscoverClient;
use crate::error::Result;
use crate::service::{HealthCheckPolicy, InstanceIdentity, InstanceInfo, InstanceRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Default)]
pub struct InMemoryDiscoverClient {
    reject_registrations: bool,
    instances: Mutex<HashMap<String, InstanceRecord>>,
    register_calls: AtomicUsize,
    deregister_calls: AtomicUsize,
}

impl InMemoryDiscoverClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that refuses every registration.
    pub fn rejecting() -> Self {
        Self {
            reject_registrations: true,
            ..Self::default()
        }
    }

    /// Seed an instance that discovery will return.
    pub fn with_instance(self, record: InstanceRecord) -> Self {
        self.lock().insert(record.id.clone(), record);
        self
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn deregister_calls(&self) -> usize {
        self.deregister_calls.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self, instance_id: &str) -> bool {
        self.lock().contains_key(instance_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, InstanceRecord>> {
        // A poisoned map is still a consistent map of records.
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DiscoverClient for InMemoryDiscoverClient {
    async fn register(
        &self,
        identity: &InstanceIdentity,
        health_check_path: &str,
        meta: &HashMap<String, String>,
    ) -> bool {
        self.register_calls.fetch_add(1, Ordering::SeqCst);

        if self.reject_registrations {
            warn!("Register service {} rejected", identity.instance_id());
            return false;
        }

        let info = InstanceInfo::new(
            identity,
            health_check_path,
            meta,
            &HealthCheckPolicy::default(),
        );
        self.lock()
            .insert(info.id.clone(), InstanceRecord::from(info));

        info!("Register service {} success", identity.instance_id());
        true
    }

    async fn deregister(&self, instance_id: &str) -> bool {
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);

        if self.lock().remove(instance_id).is_some() {
            info!("Deregister service {} success", instance_id);
            true
        } else {
            warn!("Deregister service {} failed: not registered", instance_id);
            false
        }
    }

    async fn try_discover_service(&self, service_name: &str) -> Result<Vec<InstanceRecord>> {
        let mut instances: Vec<InstanceRecord> = self
            .lock()
            .values()
            .filter(|record| record.name == service_name)
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }
}
