pub mod bootstrap;
pub mod error;
pub mod registry;
pub mod service;

pub use bootstrap::{shutdown_signal, LifecycleState, ServiceLifecycle, ShutdownCause, ShutdownSignal};
pub use error::{RegistryError, Result};
pub use registry::{ConsulDiscoverClient, DiscoverClient, InMemoryDiscoverClient};
pub use service::{
    CheckStrategy, HealthCheckPolicy, HealthStatus, InstanceIdentity, InstanceInfo, InstanceRecord,
    Weights, HEALTH_CHECK_PATH, MIN_TTL,
};
