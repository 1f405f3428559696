//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Shared primitives and utilities for the exporter runtime."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

pub const DEFAULT_BASE_URL: &str = "https://api.licensing.nvidia.com";
pub const DEFAULT_PARALLELISM: usize = 8;
pub const DEFAULT_LISTEN_ADDRESS: &str = ":9844";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_OTEL_ENDPOINT: &str = "127.0.0.1:4317";
pub const DEFAULT_OTEL_SERVICE_NAME: &str = "nvidia-license-server-exporter";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_scrape_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_owned()
}

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_owned()
}

fn default_otel_endpoint() -> String {
    DEFAULT_OTEL_ENDPOINT.to_owned()
}

fn default_otel_service_name() -> String {
    DEFAULT_OTEL_SERVICE_NAME.to_owned()
}

fn default_otel_insecure() -> bool {
    true
}

fn default_push_interval() -> Duration {
    Duration::from_secs(60)
}

/// Best-effort host identity used as the default OTLP `service.instance.id`.
pub fn hostname_or_unknown() -> String {
    let from_env = std::env::var("HOSTNAME").ok();
    let from_file = || {
        fs::read_to_string("/etc/hostname")
            .ok()
            .map(|raw| raw.trim().to_owned())
    };
    from_env
        .filter(|host| !host.trim().is_empty())
        .or_else(from_file)
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Primary configuration object for the exporter runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ExporterConfig {
    pub const ENV_CONFIG_PATH: &'static str = "NLS_EXPORTER_CONFIG";

    /// Load a TOML configuration file. Values are normalised but not validated,
    /// because command-line overrides are usually applied afterwards.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let mut config = toml::from_str::<ExporterConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.normalize();
        Ok(config)
    }

    /// Replace zero or blank settings with their defaults.
    pub fn normalize(&mut self) {
        let api = &mut self.api;
        api.base_url = api.base_url.trim().trim_end_matches('/').to_owned();
        if api.base_url.is_empty() {
            api.base_url = default_base_url();
        }
        api.org_name = api.org_name.trim().to_owned();
        api.api_key = api.api_key.trim().to_owned();
        api.service_instance_id = api
            .service_instance_id
            .take()
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty());
        if api.parallelism == 0 {
            api.parallelism = default_parallelism();
        }
        if api.request_timeout.is_zero() {
            api.request_timeout = default_request_timeout();
        }

        if self.cache.ttl.is_zero() {
            self.cache.ttl = default_cache_ttl();
        }
        if self.cache.scrape_timeout.is_zero() {
            self.cache.scrape_timeout = default_scrape_timeout();
        }

        if self.http.listen_address.trim().is_empty() {
            self.http.listen_address = default_listen_address();
        }
        if !self.http.metrics_path.starts_with('/') {
            self.http.metrics_path = format!("/{}", self.http.metrics_path.trim());
        }

        if self.otel.push_interval.is_zero() {
            self.otel.push_interval = default_push_interval();
        }
        if self.otel.service_instance_id.trim().is_empty() {
            self.otel.service_instance_id = hostname_or_unknown();
        }
    }

    /// Validate structural invariants. Failures here are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.http.socket_addr()?;
        self.otel.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for ExporterConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let mut config: ExporterConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.normalize();
        Ok(config)
    }
}

/// Upstream licensing API settings.
#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub service_instance_id: Option<String>,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            org_name: String::new(),
            api_key: String::new(),
            service_instance_id: None,
            parallelism: default_parallelism(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.org_name.trim().is_empty() {
            return Err(anyhow!(
                "missing required org name: set NVIDIA_ORG_NAME or pass --nvidia-org-name"
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(anyhow!(
                "missing required API key: set NVIDIA_API_KEY or pass --nvidia-api-key"
            ));
        }
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid api base url {}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(anyhow!(
                "api base url {} must be an absolute http(s) url",
                self.base_url
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("org_name", &self.org_name)
            .field("api_key", &"<redacted>")
            .field("service_instance_id", &self.service_instance_id)
            .field("parallelism", &self.parallelism)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Snapshot cache policy shared by the scrape and push paths.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ttl: Duration,
    /// Upper bound for one coalesced refresh, also used per scrape.
    #[serde(default = "default_scrape_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub scrape_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            scrape_timeout: default_scrape_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl HttpConfig {
    /// Resolve the listen address, accepting the `:port` shorthand.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let raw = self.listen_address.trim();
        let candidate = if raw.starts_with(':') {
            format!("0.0.0.0{raw}")
        } else {
            raw.to_owned()
        };
        candidate
            .parse()
            .with_context(|| format!("invalid listen address {}", self.listen_address))
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub service_instance_id: String,
    #[serde(default = "default_otel_insecure")]
    pub insecure: bool,
    #[serde(default = "default_push_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub push_interval: Duration,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            service_instance_id: String::new(),
            insecure: default_otel_insecure(),
            push_interval: default_push_interval(),
        }
    }
}

impl OtelConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("otel endpoint is required"));
        }
        if self.service_name.trim().is_empty() {
            return Err(anyhow!("otel service name is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// When set, a daily rolling JSON log is written here as well as stdout.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub file_prefix: Option<String>,
}
