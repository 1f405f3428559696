//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "binary"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Binary entrypoint for the license utilisation exporter."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::Parser;
use nls_cls::{ClientConfig, ClsClient};
use nls_common::config::ExporterConfig;
use nls_common::{init_tracing, parse_duration, LogFormat};
use nls_metrics::{new_registry, spawn_http_server, ExporterMetrics, SnapshotCollector};
use nls_otel::MetricsPusher;
use nls_snapshot::SnapshotService;
use tracing::{info, warn};

const SERVICE_NAME: &str = "nls-exporterd";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Parser)]
#[command(
    author,
    version = env!("CARGO_PKG_VERSION"),
    about = "Exports NVIDIA cloud license service utilisation as Prometheus and OTLP metrics",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", env = ExporterConfig::ENV_CONFIG_PATH, help = "Path to a TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, env = "LISTEN_ADDRESS", help = "Address to listen on, e.g. :9844")]
    listen_address: Option<String>,

    #[arg(long, env = "PORT", help = "Port used when no listen address is given")]
    port: Option<u16>,

    #[arg(long, env = "METRICS_PATH", help = "Path under which metrics are served")]
    metrics_path: Option<String>,

    #[arg(long, env = "NVIDIA_API_BASE_URL", help = "Licensing API base URL")]
    nvidia_api_base_url: Option<String>,

    #[arg(long, env = "NVIDIA_ORG_NAME", help = "Organisation name (falls back to NLS_ORG_NAME)")]
    nvidia_org_name: Option<String>,

    #[arg(long, env = "NVIDIA_API_KEY", hide_env_values = true, help = "API key (falls back to NLS_API_KEY)")]
    nvidia_api_key: Option<String>,

    #[arg(long, env = "NVIDIA_SERVICE_INSTANCE_ID", help = "Default service instance id for lease queries")]
    nvidia_service_instance_id: Option<String>,

    #[arg(long, env = "SCRAPE_TIMEOUT", value_parser = parse_duration, help = "Upper bound for one refresh, e.g. 20s")]
    scrape_timeout: Option<Duration>,

    #[arg(long, env = "CACHE_TTL", value_parser = parse_duration, help = "How long a snapshot is served from cache")]
    cache_ttl: Option<Duration>,

    #[arg(long, env = "PARALLELISM", help = "Maximum concurrent upstream requests per phase")]
    parallelism: Option<usize>,

    #[arg(long, env = "OTEL_ENABLED", num_args = 0..=1, default_missing_value = "true", value_parser = BoolishValueParser::new(), help = "Enable OTLP push")]
    otel_enabled: Option<bool>,

    #[arg(long, env = "OTEL_ENDPOINT", help = "OTLP gRPC collector endpoint")]
    otel_endpoint: Option<String>,

    #[arg(long, env = "OTEL_SERVICE_NAME", help = "OTLP service.name resource attribute")]
    otel_service_name: Option<String>,

    #[arg(long, env = "OTEL_SERVICE_INSTANCE_ID", help = "OTLP service.instance.id resource attribute")]
    otel_service_instance_id: Option<String>,

    #[arg(long, env = "OTEL_INSECURE", num_args = 0..=1, default_missing_value = "true", value_parser = BoolishValueParser::new(), help = "Use plaintext gRPC to the collector")]
    otel_insecure: Option<bool>,

    #[arg(long, env = "OTEL_PUSH_INTERVAL", value_parser = parse_duration, help = "Interval between OTLP refreshes and exports")]
    otel_push_interval: Option<Duration>,

    #[arg(long, value_parser = clap::value_parser!(LogFormat), help = "Log format: structured-json or pretty")]
    log_format: Option<LogFormat>,

    #[arg(long, value_name = "DIR", help = "Also write daily rolling JSON logs here")]
    log_dir: Option<PathBuf>,
}

fn env_non_blank(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl Cli {
    /// Load the optional file, then layer flags and environment on top.
    fn resolve(self) -> Result<ExporterConfig> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::from_path(path)?,
            None => ExporterConfig::default(),
        };
        self.apply(&mut config, env_non_blank);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn apply(self, config: &mut ExporterConfig, fallback_env: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = non_blank(self.listen_address) {
            config.http.listen_address = listen;
        } else if let Some(port) = self.port {
            config.http.listen_address = format!(":{port}");
        }
        if let Some(path) = non_blank(self.metrics_path) {
            config.http.metrics_path = path;
        }

        if let Some(base_url) = non_blank(self.nvidia_api_base_url) {
            config.api.base_url = base_url;
        }
        if let Some(org) = non_blank(self.nvidia_org_name).or_else(|| fallback_env("NLS_ORG_NAME")) {
            config.api.org_name = org;
        }
        if let Some(key) = non_blank(self.nvidia_api_key).or_else(|| fallback_env("NLS_API_KEY")) {
            config.api.api_key = key;
        }
        if let Some(id) = non_blank(self.nvidia_service_instance_id) {
            config.api.service_instance_id = Some(id);
        }
        if let Some(parallelism) = self.parallelism {
            config.api.parallelism = parallelism;
        }

        if let Some(timeout) = self.scrape_timeout {
            config.cache.scrape_timeout = timeout;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache.ttl = ttl;
        }

        if let Some(enabled) = self.otel_enabled {
            config.otel.enabled = enabled;
        }
        if let Some(endpoint) = non_blank(self.otel_endpoint) {
            config.otel.endpoint = endpoint;
        }
        if let Some(name) = non_blank(self.otel_service_name) {
            config.otel.service_name = name;
        }
        if let Some(id) = non_blank(self.otel_service_instance_id) {
            config.otel.service_instance_id = id;
        }
        if let Some(insecure) = self.otel_insecure {
            config.otel.insecure = insecure;
        }
        if let Some(interval) = self.otel_push_interval {
            config.otel.push_interval = interval;
        }

        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(dir) = self.log_dir {
            config.logging.directory = Some(dir);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().resolve()?;
    init_tracing(SERVICE_NAME, &config.logging)?;
    run(config).await
}

async fn run(config: ExporterConfig) -> Result<()> {
    let listen = config.http.socket_addr()?;
    let client = ClsClient::new(ClientConfig::from(&config.api))
        .context("failed to build licensing api client")?;
    let service = SnapshotService::new(
        Arc::new(client),
        config.cache.ttl,
        config.cache.scrape_timeout,
    );

    let metrics = ExporterMetrics::new(new_registry())?;
    metrics.set_build_info(env!("CARGO_PKG_VERSION"));
    let collector = SnapshotCollector::new(
        service.clone(),
        config.api.org_name.clone(),
        config.cache.scrape_timeout,
        metrics,
    );
    let server = spawn_http_server(Arc::new(collector), listen, &config.http.metrics_path)?;

    let pusher = if config.otel.enabled {
        let mut pusher = MetricsPusher::new(&config.otel, &config.api.org_name, service.clone())?;
        pusher.start();
        Some(pusher)
    } else {
        info!("otlp push disabled by configuration");
        None
    };

    info!(
        listen = %server.addr(),
        metrics_path = %config.http.metrics_path,
        base_url = %config.api.base_url,
        org_name = %config.api.org_name,
        service_instance_id = ?config.api.service_instance_id,
        parallelism = config.api.parallelism,
        cache_ttl_seconds = service.ttl().as_secs_f64(),
        scrape_timeout_seconds = service.refresh_timeout().as_secs_f64(),
        otel_enabled = config.otel.enabled,
        "exporter running; waiting for termination signal"
    );

    wait_for_shutdown_signal().await?;
    info!("termination signal received; shutting down");

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        if let Some(pusher) = pusher {
            if let Err(err) = pusher.shutdown().await {
                warn!(error = %err, "otlp pusher did not shut down cleanly");
            }
        }
        server.shutdown().await
    })
    .await;
    match drained {
        Ok(result) => result?,
        Err(_) => warn!(
            grace_seconds = SHUTDOWN_GRACE.as_secs(),
            "shutdown grace period elapsed"
        ),
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["nls-exporterd"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\norg_name = \"from-file\"\napi_key = \"file-key\"\n\n[cache]\nttl = 30\n"
        )
        .unwrap();
        let mut config = ExporterConfig::from_path(file.path()).unwrap();

        let parsed = Cli {
            nvidia_org_name: Some("from-flag".into()),
            cache_ttl: Some(Duration::from_secs(90)),
            parallelism: Some(3),
            ..Cli::default()
        };
        parsed.apply(&mut config, no_env);
        config.normalize();

        assert_eq!(config.api.org_name, "from-flag");
        assert_eq!(config.api.api_key, "file-key");
        assert_eq!(config.cache.ttl, Duration::from_secs(90));
        assert_eq!(config.api.parallelism, 3);
        config.validate().unwrap();
    }

    #[test]
    fn port_is_used_without_listen_address() {
        let mut config = ExporterConfig::default();
        Cli {
            port: Some(8080),
            ..Cli::default()
        }
        .apply(&mut config, no_env);
        assert_eq!(config.http.listen_address, ":8080");
        assert_eq!(config.http.socket_addr().unwrap().port(), 8080);

        let mut config = ExporterConfig::default();
        Cli {
            port: Some(8080),
            listen_address: Some("127.0.0.1:9000".into()),
            ..Cli::default()
        }
        .apply(&mut config, no_env);
        assert_eq!(config.http.listen_address, "127.0.0.1:9000");
    }

    #[test]
    fn alias_env_fills_missing_credentials() {
        let mut config = ExporterConfig::default();
        let aliases = |name: &str| match name {
            "NLS_ORG_NAME" => Some("alias-org".to_owned()),
            "NLS_API_KEY" => Some("alias-key".to_owned()),
            _ => None,
        };
        Cli::default().apply(&mut config, aliases);
        assert_eq!(config.api.org_name, "alias-org");
        assert_eq!(config.api.api_key, "alias-key");

        let mut config = ExporterConfig::default();
        Cli {
            nvidia_org_name: Some("primary".into()),
            ..Cli::default()
        }
        .apply(&mut config, aliases);
        assert_eq!(config.api.org_name, "primary");
    }

    #[test]
    fn parses_duration_and_bool_flags() {
        let parsed = cli(&[
            "--scrape-timeout",
            "1m30s",
            "--otel-enabled",
            "--otel-insecure=false",
            "--log-format",
            "pretty",
        ]);
        assert_eq!(parsed.scrape_timeout, Some(Duration::from_secs(90)));
        assert_eq!(parsed.otel_enabled, Some(true));
        assert_eq!(parsed.otel_insecure, Some(false));
        assert_eq!(parsed.log_format, Some(LogFormat::Pretty));
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = ExporterConfig::default();
        config.api.base_url = "https://licensing.example".into();
        Cli {
            nvidia_api_base_url: Some("  ".into()),
            ..Cli::default()
        }
        .apply(&mut config, no_env);
        assert_eq!(config.api.base_url, "https://licensing.example");
    }
}
