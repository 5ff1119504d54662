use registry_client::{DiscoverClient, InstanceRecord, RegistryError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const HELLO_MESSAGE: &str = "Hello I am a service";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service not existed")]
    NotExisted,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Business logic behind the HTTP endpoints.
#[derive(Clone)]
pub struct HelloService {
    client: Arc<dyn DiscoverClient>,
}

impl HelloService {
    pub fn new(client: Arc<dyn DiscoverClient>) -> Self {
        Self { client }
    }

    pub fn health_check(&self) -> bool {
        true
    }

    pub fn say_hello(&self) -> &'static str {
        HELLO_MESSAGE
    }

    /// Looks up instances of `service_name`. An empty result is reported as
    /// [`ServiceError::NotExisted`]; an unreachable registry as
    /// [`ServiceError::Registry`].
    pub async fn discover_service(
        &self,
        service_name: &str,
    ) -> Result<Vec<InstanceRecord>, ServiceError> {
        let instances = self.client.try_discover_service(service_name).await?;
        debug!("Discovered {} instances of {}", instances.len(), service_name);

        if instances.is_empty() {
            return Err(ServiceError::NotExisted);
        }
        Ok(instances)
    }
}
