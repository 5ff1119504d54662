//! Client for the HTTP agent API of a Consul-compatible registry.

use super::DiscoverClient;
use crate::error::{RegistryError, Result};
use crate::service::{
    HealthCheckPolicy, HealthStatus, InstanceIdentity, InstanceInfo, InstanceRecord, Weights,
};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use url::Url;

pub const DEFAULT_REGISTRY_URL: &str = "http://127.0.0.1:8500";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const REGISTER_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Registers, deregisters and discovers instances through a registry agent.
pub struct ConsulDiscoverClient {
    base_url: Url,
    client: Client,
    policy: HealthCheckPolicy,
    passing_only: bool,
    span: Span,
}

impl ConsulDiscoverClient {
    /// Create a client for the agent at `base_url` (e.g. `http://127.0.0.1:8500`).
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidServiceData(format!(
                "registry url {} cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        let span = info_span!("registry", agent = %base_url);

        Ok(Self {
            base_url,
            client,
            policy: HealthCheckPolicy::default(),
            passing_only: false,
            span,
        })
    }

    /// Create a client for the agent named by `SERVICE_REGISTRY_URL`.
    pub fn from_env() -> Result<Self> {
        let registry_url =
            env::var("SERVICE_REGISTRY_URL").unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string());
        Self::new(&registry_url)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn with_health_check(mut self, policy: HealthCheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Only return instances whose checks are all passing.
    pub fn passing_only(mut self, passing_only: bool) -> Self {
        self.passing_only = passing_only;
        self
    }

    /// Log under `span` instead of the default `registry` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base is rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn try_register(
        &self,
        identity: &InstanceIdentity,
        health_check_path: &str,
        meta: &HashMap<String, String>,
    ) -> Result<()> {
        let info = InstanceInfo::new(identity, health_check_path, meta, &self.policy);
        let body = serde_json::to_vec(&info)?;
        let url = self.endpoint(&["v1", "agent", "service", "register"]);

        debug!("Registering {} at {}", info.id, url);

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, REGISTER_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        expect_ok(response.status())
    }

    async fn try_deregister(&self, instance_id: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", instance_id]);

        debug!("Deregistering {} at {}", instance_id, url);

        let response = self.client.put(url).send().await?;
        expect_ok(response.status())
    }

    async fn try_pass_ttl(&self, instance_id: &str) -> Result<()> {
        let check_id = format!("service:{}", instance_id);
        let url = self.endpoint(&["v1", "agent", "check", "pass", check_id.as_str()]);

        let response = self.client.put(url).send().await?;
        expect_ok(response.status())
    }

    async fn fetch_instances(&self, service_name: &str) -> Result<Vec<InstanceRecord>> {
        let mut url = self.endpoint(&["v1", "health", "service", service_name]);
        if self.passing_only {
            url.query_pairs_mut().append_pair("passing", "true");
        }

        debug!("Looking up service {} at {}", service_name, url);

        let response = self.client.get(url).send().await?;
        expect_ok(response.status())?;

        let entries: Vec<HealthServiceEntry> = response.json().await?;
        let instances: Vec<InstanceRecord> = entries.into_iter().map(InstanceRecord::from).collect();

        info!("Found {} instances of service {}", instances.len(), service_name);

        Ok(instances)
    }
}

fn expect_ok(status: StatusCode) -> Result<()> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(RegistryError::UnexpectedStatus(status.as_u16()))
    }
}

#[async_trait]
impl DiscoverClient for ConsulDiscoverClient {
    async fn register(
        &self,
        identity: &InstanceIdentity,
        health_check_path: &str,
        meta: &HashMap<String, String>,
    ) -> bool {
        match self
            .try_register(identity, health_check_path, meta)
            .instrument(self.span.clone())
            .await
        {
            Ok(()) => {
                self.span.in_scope(|| {
                    info!("Register service {} success", identity.instance_id())
                });
                true
            }
            Err(e) => {
                self.span.in_scope(|| {
                    error!("Register service {} failed: {}", identity.instance_id(), e)
                });
                false
            }
        }
    }

    async fn deregister(&self, instance_id: &str) -> bool {
        match self
            .try_deregister(instance_id)
            .instrument(self.span.clone())
            .await
        {
            Ok(()) => {
                self.span
                    .in_scope(|| info!("Deregister service {} success", instance_id));
                true
            }
            Err(e) => {
                self.span
                    .in_scope(|| warn!("Deregister service {} failed: {}", instance_id, e));
                false
            }
        }
    }

    async fn try_discover_service(&self, service_name: &str) -> Result<Vec<InstanceRecord>> {
        self.fetch_instances(service_name)
            .instrument(self.span.clone())
            .await
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        self.policy.keep_alive_interval()
    }

    async fn keep_alive(&self, instance_id: &str) -> bool {
        match self
            .try_pass_ttl(instance_id)
            .instrument(self.span.clone())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.span
                    .in_scope(|| warn!("Failed to keep {} alive: {}", instance_id, e));
                false
            }
        }
    }
}

/// One element of `GET /v1/health/service/{name}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthServiceEntry {
    #[serde(default)]
    node: NodeEntry,
    service: AgentServiceEntry,
    #[serde(default)]
    checks: Vec<CheckEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceEntry {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
    #[serde(default)]
    weights: Option<WeightsEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WeightsEntry {
    passing: u32,
    warning: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CheckEntry {
    status: String,
}

impl From<HealthServiceEntry> for InstanceRecord {
    fn from(entry: HealthServiceEntry) -> Self {
        let service = entry.service;
        let address = if service.address.is_empty() {
            entry.node.address
        } else {
            service.address
        };
        let status = entry
            .checks
            .iter()
            .map(|check| HealthStatus::from_check_status(&check.status))
            .max()
            .unwrap_or(HealthStatus::Passing);
        let weights = service
            .weights
            .map(|w| Weights {
                passing: w.passing,
                warning: w.warning,
            })
            .unwrap_or_default();

        InstanceRecord {
            id: service.id,
            name: service.service,
            service: None,
            tags: service.tags.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
            address,
            port: service.port,
            metadata: service.meta.unwrap_or_default(),
            weights,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = ConsulDiscoverClient::new("http://127.0.0.1:8500/consul/").unwrap();
        let url = client.endpoint(&["v1", "agent", "service", "deregister", "SayHello:1"]);

        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8500/consul/v1/agent/service/deregister/SayHello:1"
        );
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = ConsulDiscoverClient::new("http://127.0.0.1:8500").unwrap();
        let url = client.endpoint(&["v1", "health", "service", "say hello/v2"]);

        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8500/v1/health/service/say%20hello%2Fv2"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        assert!(ConsulDiscoverClient::new("mailto:ops@example.com").is_err());
        assert!(ConsulDiscoverClient::new("not a url").is_err());
    }

    #[test]
    fn test_health_entry_falls_back_to_node_address() {
        let entry: HealthServiceEntry = serde_json::from_str(
            r#"{
                "Node": {"Address": "10.0.0.7"},
                "Service": {"ID": "SayHello:1", "Service": "SayHello", "Tags": null, "Address": "", "Port": 10086},
                "Checks": [{"Status": "passing"}, {"Status": "warning"}]
            }"#,
        )
        .unwrap();

        let record = InstanceRecord::from(entry);
        assert_eq!(record.address, "10.0.0.7");
        assert_eq!(record.status, HealthStatus::Warning);
        assert!(record.tags.is_empty());
        assert_eq!(record.weights, Weights::default());
    }
}
