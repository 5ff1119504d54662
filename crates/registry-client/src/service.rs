use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// Path the registry polls when an interval check is registered.
pub const HEALTH_CHECK_PATH: &str = "/health";

/// Shortest TTL a self-reported check is registered with. Anything shorter
/// cannot be refreshed at `ttl / 2` without flapping.
pub const MIN_TTL: Duration = Duration::from_secs(2);

/// Identity of the running instance. The id is generated once and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    service_name: String,
    instance_id: String,
    host: String,
    port: u16,
}

impl InstanceIdentity {
    /// Builds an identity with a fresh `"{service_name}:{uuid}"` instance id.
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Result<Self> {
        let service_name = service_name.into();
        let host = host.into();

        if service_name.is_empty() {
            return Err(RegistryError::InvalidServiceData(
                "service name must not be empty".to_string(),
            ));
        }
        if host.is_empty() {
            return Err(RegistryError::InvalidServiceData(
                "service host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(RegistryError::InvalidServiceData(
                "service port must be greater than zero".to_string(),
            ));
        }

        let instance_id = format!("{}:{}", service_name, Uuid::new_v4());

        Ok(Self {
            service_name,
            instance_id,
            host,
            port,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn health_check_url(&self, health_check_path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, health_check_path)
    }
}

/// Aggregated health of a discovered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Parses a registry check status; unknown values count as critical.
    pub fn from_check_status(status: &str) -> Self {
        match status {
            "passing" => HealthStatus::Passing,
            "warning" => HealthStatus::Warning,
            _ => HealthStatus::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weights {
    pub passing: u32,
    pub warning: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            passing: 10,
            warning: 1,
        }
    }
}

/// How the registry learns about instance health. A check is either polled
/// by the registry or reported by the instance, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStrategy {
    /// The registry issues `GET {health url}` every period.
    Interval(Duration),
    /// The instance must report a pass before the TTL runs out.
    Ttl(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    pub deregister_after: Duration,
    pub strategy: CheckStrategy,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            deregister_after: Duration::from_secs(30),
            strategy: CheckStrategy::Interval(Duration::from_secs(15)),
        }
    }
}

impl HealthCheckPolicy {
    pub fn interval(period: Duration) -> Self {
        Self {
            strategy: CheckStrategy::Interval(period),
            ..Self::default()
        }
    }

    /// TTL check; values below [`MIN_TTL`] are raised to it.
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            strategy: CheckStrategy::Ttl(ttl.max(MIN_TTL)),
            ..Self::default()
        }
    }

    pub fn with_deregister_after(mut self, after: Duration) -> Self {
        self.deregister_after = after;
        self
    }

    /// Period at which a TTL check has to be refreshed, half the TTL.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        match self.strategy {
            CheckStrategy::Interval(_) => None,
            CheckStrategy::Ttl(ttl) => Some(ttl / 2),
        }
    }

    pub fn to_check_info(&self, health_check_url: String) -> HealthCheckInfo {
        let deregister_critical_service_after = format_duration(self.deregister_after);
        match self.strategy {
            CheckStrategy::Interval(period) => HealthCheckInfo {
                deregister_critical_service_after,
                args: Vec::new(),
                http: Some(health_check_url),
                interval: Some(format_duration(period)),
                ttl: None,
            },
            CheckStrategy::Ttl(ttl) => HealthCheckInfo {
                deregister_critical_service_after,
                args: Vec::new(),
                http: None,
                interval: None,
                ttl: Some(format_duration(ttl)),
            },
        }
    }
}

/// Formats a duration the way the registry agent parses it ("15s", "250ms").
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        format!("{}s", duration.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{}ns", duration.as_nanos())
    }
}

/// `check` block of the registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckInfo {
    pub deregister_critical_service_after: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Registration payload sent to `PUT /v1/agent/service/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
    pub enable_tag_override: bool,
    pub check: HealthCheckInfo,
    pub weights: Weights,
}

impl InstanceInfo {
    pub fn new(
        identity: &InstanceIdentity,
        health_check_path: &str,
        meta: &HashMap<String, String>,
        policy: &HealthCheckPolicy,
    ) -> Self {
        Self {
            id: identity.instance_id().to_string(),
            name: identity.service_name().to_string(),
            service: None,
            tags: BTreeSet::new(),
            address: identity.host().to_string(),
            port: identity.port(),
            meta: meta.clone(),
            enable_tag_override: false,
            check: policy.to_check_info(identity.health_check_url(health_check_path)),
            weights: Weights::default(),
        }
    }
}

/// Registry-side view of one instance, as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub tags: BTreeSet<String>,
    pub address: String,
    pub port: u16,
    pub metadata: HashMap<String, String>,
    pub weights: Weights,
    pub status: HealthStatus,
}

impl InstanceRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            service: None,
            tags: BTreeSet::new(),
            address: address.into(),
            port,
            metadata: HashMap::new(),
            weights: Weights::default(),
            status: HealthStatus::Passing,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl From<InstanceInfo> for InstanceRecord {
    fn from(info: InstanceInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            service: info.service,
            tags: info.tags,
            address: info.address,
            port: info.port,
            metadata: info.meta,
            weights: info.weights,
            status: HealthStatus::Passing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_is_prefixed_with_service_name() {
        let identity = InstanceIdentity::new("SayHello", "127.0.0.1", 10086).unwrap();

        let (name, uuid) = identity.instance_id().split_once(':').unwrap();
        assert_eq!(name, "SayHello");
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn test_instance_ids_do_not_collide() {
        let ids: BTreeSet<String> = (0..10_000)
            .map(|_| {
                InstanceIdentity::new("SayHello", "127.0.0.1", 10086)
                    .unwrap()
                    .instance_id()
                    .to_string()
            })
            .collect();

        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_identity_rejects_zero_port() {
        let result = InstanceIdentity::new("SayHello", "127.0.0.1", 0);
        assert!(matches!(result, Err(RegistryError::InvalidServiceData(_))));
    }

    #[test]
    fn test_identity_rejects_empty_name() {
        assert!(InstanceIdentity::new("", "127.0.0.1", 10086).is_err());
    }

    #[test]
    fn test_default_registration_payload() {
        let identity = InstanceIdentity::new("SayHello", "127.0.0.1", 10086).unwrap();
        let info = InstanceInfo::new(
            &identity,
            HEALTH_CHECK_PATH,
            &HashMap::new(),
            &HealthCheckPolicy::default(),
        );

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], identity.instance_id());
        assert_eq!(json["name"], "SayHello");
        assert_eq!(json["address"], "127.0.0.1");
        assert_eq!(json["port"], 10086);
        assert_eq!(json["enableTagOverride"], false);
        assert_eq!(json["check"]["deregisterCriticalServiceAfter"], "30s");
        assert_eq!(json["check"]["http"], "http://127.0.0.1:10086/health");
        assert_eq!(json["check"]["interval"], "15s");
        assert_eq!(json["weights"]["passing"], 10);
        assert_eq!(json["weights"]["warning"], 1);

        // Empty optional parts stay off the wire.
        assert!(json.get("tags").is_none());
        assert!(json.get("meta").is_none());
        assert!(json.get("service").is_none());
        assert!(json["check"].get("ttl").is_none());
        assert!(json["check"].get("args").is_none());
    }

    #[test]
    fn test_ttl_policy_omits_polling_fields() {
        let policy = HealthCheckPolicy::ttl(Duration::from_secs(10));
        let check = policy.to_check_info("http://127.0.0.1:10086/health".to_string());

        assert_eq!(check.ttl.as_deref(), Some("10s"));
        assert!(check.http.is_none());
        assert!(check.interval.is_none());
        assert_eq!(policy.keep_alive_interval(), Some(Duration::from_secs(5)));
        assert_eq!(HealthCheckPolicy::default().keep_alive_interval(), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_micros(250)), "250000ns");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_short_ttl_is_clamped() {
        let policy = HealthCheckPolicy::ttl(Duration::from_millis(500));
        let check = policy.to_check_info("http://127.0.0.1:10086/health".to_string());

        assert_eq!(policy.strategy, CheckStrategy::Ttl(MIN_TTL));
        assert_eq!(check.ttl.as_deref(), Some("2s"));
        assert_eq!(policy.keep_alive_interval(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_worst_status_orders_last() {
        assert!(HealthStatus::Critical > HealthStatus::Warning);
        assert!(HealthStatus::Warning > HealthStatus::Passing);
        assert_eq!(HealthStatus::from_check_status("maintenance"), HealthStatus::Critical);
    }
}
