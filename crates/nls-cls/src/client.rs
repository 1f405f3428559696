//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use nls_common::config::{ApiConfig, DEFAULT_BASE_URL, DEFAULT_PARALLELISM};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace};
use url::Url;

use crate::api::{
    ActiveLeaseClient, ActiveLeasesResponse, LicensePool, LicensePoolsResponse, LicenseServer,
    LicenseServersResponse, VirtualGroup, VirtualGroupsResponse,
};
use crate::capacity::{self, ServerCapacity};
use crate::error::{ClsError, Result};
use crate::leases::{GroupLeaseContext, LeaseLedger, LeaseTotals};
use crate::model::Snapshot;
use crate::task_group::TaskGroup;

/// Header selecting which service instance answers a lease query.
pub const SERVICE_INSTANCE_HEADER: &str = "x-nv-service-instance-id";
const API_KEY_HEADER: &str = "x-api-key";
const USER_AGENT_VALUE: &str = concat!("nvidia-license-server-exporter/", env!("CARGO_PKG_VERSION"));
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings for [`ClsClient::new`].
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// API root. Blank falls back to the public licensing endpoint.
    pub base_url: String,
    /// Organisation API key, sent as `x-api-key`.
    pub api_key: String,
    /// Organisation name used in every path.
    pub org_name: String,
    /// Default service instance header for requests that do not carry one.
    pub service_instance_id: Option<String>,
    /// Concurrent requests per fan-out phase. Zero means the default of 8.
    pub parallelism: usize,
    /// Per-request timeout. Zero means the default of 15 seconds.
    pub request_timeout: Duration,
    /// Pre-built HTTP client. When set, `request_timeout` is not applied.
    pub http_client: Option<reqwest::Client>,
}

impl From<&ApiConfig> for ClientConfig {
    fn from(api: &ApiConfig) -> Self {
        Self {
            base_url: api.base_url.clone(),
            api_key: api.api_key.clone(),
            org_name: api.org_name.clone(),
            service_instance_id: api.service_instance_id.clone(),
            parallelism: api.parallelism,
            request_timeout: api.request_timeout,
            http_client: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("org_name", &self.org_name)
            .field("service_instance_id", &self.service_instance_id)
            .field("parallelism", &self.parallelism)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

struct Inner {
    base_url: Url,
    api_key: String,
    org_name: String,
    service_instance_id: Option<String>,
    parallelism: usize,
    http: reqwest::Client,
}

/// Cheaply cloneable handle to the licensing API.
#[derive(Clone)]
pub struct ClsClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for ClsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClsClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("org_name", &self.inner.org_name)
            .field("parallelism", &self.inner.parallelism)
            .finish_non_exhaustive()
    }
}

impl ClsClient {
    /// Validate settings and build a client. Blank credentials and unusable
    /// base URLs are rejected here rather than on first use.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err(ClsError::InvalidConfig("api key is required".into()));
        }
        let org_name = config.org_name.trim();
        if org_name.is_empty() {
            return Err(ClsError::InvalidConfig("org name is required".into()));
        }

        let raw_base = config.base_url.trim().trim_end_matches('/');
        let raw_base = if raw_base.is_empty() {
            DEFAULT_BASE_URL
        } else {
            raw_base
        };
        let base_url = Url::parse(raw_base).map_err(|err| ClsError::InvalidUrl {
            url: raw_base.to_owned(),
            reason: err.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ClsError::InvalidUrl {
                url: raw_base.to_owned(),
                reason: "must be an absolute http(s) url".into(),
            });
        }

        let http = match config.http_client {
            Some(client) => client,
            None => {
                let timeout = if config.request_timeout.is_zero() {
                    DEFAULT_REQUEST_TIMEOUT
                } else {
                    config.request_timeout
                };
                reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(ClsError::HttpClient)?
            }
        };

        let parallelism = if config.parallelism == 0 {
            DEFAULT_PARALLELISM
        } else {
            config.parallelism
        };

        Ok(Self {
            inner: Arc::new(Inner {
                base_url,
                api_key: api_key.to_owned(),
                org_name: org_name.to_owned(),
                service_instance_id: config
                    .service_instance_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned),
                parallelism,
                http,
            }),
        })
    }

    /// Organisation this client queries, trimmed.
    pub fn org_name(&self) -> &str {
        &self.inner.org_name
    }

    /// Walk the whole hierarchy and build one consistent snapshot.
    ///
    /// Server listings complete before any lease query starts, and lease
    /// totals complete before pools are aggregated. The first failing request
    /// aborts all in-flight siblings and the error is returned; dropping the
    /// returned future cancels every outstanding request.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot> {
        let started = Instant::now();
        let groups = self.list_virtual_groups().await?;
        let collected_at = Utc::now();
        let entitlement_features = capacity::entitlement_rows(&groups);
        debug!(virtual_groups = groups.len(), "listed virtual groups");

        let servers_by_group = self.list_servers_by_group(&groups).await?;
        let server_count: usize = servers_by_group.values().map(Vec::len).sum();
        debug!(servers = server_count, "listed license servers");

        let leases = self.active_lease_totals(&servers_by_group).await?;
        debug!(
            active_leases = leases.total,
            servers_with_leases = leases.server_rows.len(),
            "reconciled active leases"
        );

        let capacities = self.server_capacities(&servers_by_group, &leases).await?;

        let mut snapshot = Snapshot {
            collected_at,
            entitlement_features,
            server_active_leases: leases.server_rows,
            server_feature_active_leases: leases.feature_rows,
            active_lease_total: leases.total,
            ..Snapshot::default()
        };
        for capacity in capacities {
            snapshot
                .server_feature_capacity
                .extend(capacity.feature_capacity);
            snapshot.pool_usage.extend(capacity.pool_usage);
            snapshot.server_usage.push(capacity.usage);
        }

        info!(
            org = %self.inner.org_name,
            virtual_groups = groups.len(),
            servers = server_count,
            pools = snapshot.pool_usage.len(),
            active_leases = snapshot.active_lease_total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "license snapshot fetched"
        );
        Ok(snapshot)
    }

    async fn list_servers_by_group(
        &self,
        groups: &[VirtualGroup],
    ) -> Result<BTreeMap<i64, Vec<LicenseServer>>> {
        let mut listing = TaskGroup::new(self.inner.parallelism);
        for group in groups {
            let client = self.clone();
            let virtual_group_id = group.id;
            let virtual_group_name = group.name.clone();
            listing.spawn(async move {
                let mut servers = client
                    .list_license_servers(virtual_group_id)
                    .await
                    .map_err(|source| ClsError::LicenseServers {
                        virtual_group_id,
                        source: Box::new(source),
                    })?;
                for server in &mut servers {
                    if server.virtual_group_id == 0 {
                        server.virtual_group_id = virtual_group_id;
                    }
                    if server.virtual_group_name.is_empty() {
                        server.virtual_group_name = virtual_group_name.clone();
                    }
                }
                Ok((virtual_group_id, servers))
            });
        }
        Ok(listing.wait().await?.into_iter().collect())
    }

    async fn active_lease_totals(
        &self,
        servers_by_group: &BTreeMap<i64, Vec<LicenseServer>>,
    ) -> Result<LeaseTotals> {
        let mut queries = TaskGroup::new(self.inner.parallelism);
        for (&virtual_group_id, servers) in servers_by_group {
            let Some(context) = GroupLeaseContext::new(virtual_group_id, servers) else {
                continue;
            };
            let context = Arc::new(context);
            for service_instance_id in context.service_instance_ids() {
                let client = self.clone();
                let context = Arc::clone(&context);
                let service_instance_id = service_instance_id.to_owned();
                queries.spawn(async move {
                    let clients = client
                        .list_active_leases(context.virtual_group_id, &service_instance_id)
                        .await
                        .map_err(|source| ClsError::ActiveLeases {
                            virtual_group_id: context.virtual_group_id,
                            service_instance_id: service_instance_id.clone(),
                            source: Box::new(source),
                        })?;
                    Ok(context.resolve(&clients))
                });
            }
        }

        let mut ledger = LeaseLedger::default();
        for resolved in queries.wait().await? {
            ledger.record(resolved);
        }
        Ok(ledger.finish(servers_by_group))
    }

    async fn server_capacities(
        &self,
        servers_by_group: &BTreeMap<i64, Vec<LicenseServer>>,
        leases: &LeaseTotals,
    ) -> Result<Vec<ServerCapacity>> {
        let mut pools = TaskGroup::new(self.inner.parallelism);
        for (&virtual_group_id, servers) in servers_by_group {
            for server in servers {
                let client = self.clone();
                let server = server.clone();
                let active_leases = leases.by_server.get(&server.id).copied();
                pools.spawn(async move {
                    let listed = client
                        .list_license_pools(virtual_group_id, &server.id)
                        .await
                        .map_err(|source| ClsError::LicensePools {
                            virtual_group_id,
                            server_id: server.id.clone(),
                            source: Box::new(source),
                        })?;
                    Ok(capacity::server_capacity(&server, &listed, active_leases))
                });
            }
        }
        pools.wait().await
    }

    async fn list_virtual_groups(&self) -> Result<Vec<VirtualGroup>> {
        let url = self.endpoint(&["virtual-groups"])?;
        let response: VirtualGroupsResponse = self.get_json(url, None).await?;
        Ok(response.virtual_groups)
    }

    async fn list_license_servers(&self, virtual_group_id: i64) -> Result<Vec<LicenseServer>> {
        let group = virtual_group_id.to_string();
        let url = self.endpoint(&["virtual-groups", &group, "license-servers"])?;
        let response: LicenseServersResponse = self.get_json(url, None).await?;
        Ok(response.license_servers)
    }

    async fn list_license_pools(
        &self,
        virtual_group_id: i64,
        server_id: &str,
    ) -> Result<Vec<LicensePool>> {
        let group = virtual_group_id.to_string();
        let url = self.endpoint(&[
            "virtual-groups",
            &group,
            "license-servers",
            server_id,
            "license-pools",
        ])?;
        let response: LicensePoolsResponse = self.get_json(url, None).await?;
        Ok(response.license_pools)
    }

    async fn list_active_leases(
        &self,
        virtual_group_id: i64,
        service_instance_id: &str,
    ) -> Result<Vec<ActiveLeaseClient>> {
        let group = virtual_group_id.to_string();
        let url = self.endpoint(&["virtual-groups", &group, "leases"])?;
        let response: ActiveLeasesResponse =
            self.get_json(url, Some(service_instance_id)).await?;
        Ok(response.clients)
    }

    /// `{base}/v1/org/{org}/{segments..}` with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClsError::InvalidUrl {
                url: self.inner.base_url.to_string(),
                reason: "cannot be a base".into(),
            })?
            .pop_if_empty()
            .extend(["v1", "org", self.inner.org_name.as_str()])
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        service_instance_id: Option<&str>,
    ) -> Result<T> {
        let endpoint = url.to_string();
        trace!(endpoint = %endpoint, "GET");

        let mut request = self
            .inner
            .http
            .get(url)
            .header(API_KEY_HEADER, self.inner.api_key.as_str())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE);
        let service_instance_id = service_instance_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or(self.inner.service_instance_id.as_deref());
        if let Some(id) = service_instance_id {
            request = request.header(SERVICE_INSTANCE_HEADER, id);
        }

        let response = request.send().await.map_err(|source| ClsError::Request {
            endpoint: endpoint.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClsError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(|source| ClsError::Request {
            endpoint: endpoint.clone(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| ClsError::Decode { endpoint, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ClientConfig {
        ClientConfig {
            base_url: base_url.into(),
            api_key: "key".into(),
            org_name: "acme corp".into(),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn rejects_blank_credentials() {
        let mut blank_key = config("");
        blank_key.api_key = "  ".into();
        assert!(matches!(
            ClsClient::new(blank_key),
            Err(ClsError::InvalidConfig(msg)) if msg.contains("api key")
        ));

        let mut blank_org = config("");
        blank_org.org_name = String::new();
        assert!(matches!(
            ClsClient::new(blank_org),
            Err(ClsError::InvalidConfig(msg)) if msg.contains("org name")
        ));
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            ClsClient::new(config("not a url")),
            Err(ClsError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ClsClient::new(config("mailto:ops@example.invalid")),
            Err(ClsError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn blank_base_url_uses_public_endpoint() {
        let client = ClsClient::new(config("   ")).unwrap();
        let url = client.endpoint(&["virtual-groups"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.licensing.nvidia.com/v1/org/acme%20corp/virtual-groups"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_and_escapes_segments() {
        let client = ClsClient::new(config("http://127.0.0.1:8080/proxy/")).unwrap();
        let url = client
            .endpoint(&["virtual-groups", "4", "license-servers", "a/b", "license-pools"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/proxy/v1/org/acme%20corp/virtual-groups/4/license-servers/a%2Fb/license-pools"
        );
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut cfg = config("http://localhost");
        cfg.api_key = "super-secret".into();
        let rendered = format!("{:?}", cfg);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn org_name_is_trimmed() {
        let mut cfg = config("http://localhost");
        cfg.org_name = "  trimmed ".into();
        let client = ClsClient::new(cfg).unwrap();
        assert_eq!(client.org_name(), "trimmed");
    }
}
