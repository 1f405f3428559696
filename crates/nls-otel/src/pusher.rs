//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "OTLP meter provider and the periodic refresh loop."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nls_common::OtelConfig;
use nls_metrics::{FamilySpec, ALL_FAMILIES};
use nls_snapshot::SnapshotService;
use opentelemetry::metrics::{MeterProvider, ObservableGauge};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::{runtime, Resource};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tonic::transport::ClientTlsConfig;
use tracing::{debug, info, warn};

use crate::logging::LoggingExporter;
use crate::observations::ObservationCache;

const METER_NAME: &str = "nvidia-license-server-exporter";

/// Pushes the cached snapshot to an OTLP collector on a fixed interval.
///
/// The refresh loop keeps the shared cache warm; the periodic reader exports
/// whatever [`SnapshotService::latest`] holds at collection time.
pub struct MetricsPusher {
    provider: SdkMeterProvider,
    service: SnapshotService,
    push_interval: Duration,
    _gauges: Vec<ObservableGauge<f64>>,
    refresh_loop: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl MetricsPusher {
    pub fn new(config: &OtelConfig, org_name: &str, service: SnapshotService) -> Result<Self> {
        let endpoint = collector_endpoint(config)?;
        let service_name = config.service_name.trim();
        if service_name.is_empty() {
            return Err(anyhow!("otel service name is required"));
        }

        let mut builder = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.clone());
        if !config.insecure {
            builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
        }
        let exporter = builder
            .build()
            .with_context(|| format!("failed to build otlp metric exporter for {endpoint}"))?;

        let exporter = LoggingExporter::new(exporter, endpoint.clone());
        let reader = PeriodicReader::builder(exporter, runtime::Tokio)
            .with_interval(config.push_interval)
            .build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", service_name.to_owned()),
                KeyValue::new("service.instance.id", config.service_instance_id.clone()),
            ]))
            .build();

        let meter = provider.meter(METER_NAME);
        let cache = Arc::new(ObservationCache::new(org_name));
        let gauges = ALL_FAMILIES
            .iter()
            .map(|family| {
                let family: &'static FamilySpec = family;
                let service = service.clone();
                let cache = Arc::clone(&cache);
                meter
                    .f64_observable_gauge(family.name)
                    .with_description(family.help)
                    .with_callback(move |observer| {
                        let Some((snapshot, meta)) = service.latest() else {
                            return;
                        };
                        let by_family = cache.observations(&snapshot, &meta);
                        for observation in by_family.get(family.name).into_iter().flatten() {
                            observer.observe(observation.value, &observation.attributes);
                        }
                    })
                    .build()
            })
            .collect();

        info!(
            endpoint = %endpoint,
            service_name,
            service_instance_id = %config.service_instance_id,
            insecure = config.insecure,
            push_interval_seconds = config.push_interval.as_secs_f64(),
            "otlp metrics pusher configured"
        );

        Ok(Self {
            provider,
            service,
            push_interval: config.push_interval,
            _gauges: gauges,
            refresh_loop: None,
        })
    }

    /// Spawn the refresh loop. Calling it twice has no further effect.
    pub fn start(&mut self) {
        if self.refresh_loop.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(refresh_loop(
            self.service.clone(),
            self.push_interval,
            stop_rx,
        ));
        self.refresh_loop = Some((stop_tx, handle));
    }

    /// Stop refreshing, then flush and shut down the meter provider.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some((stop_tx, handle)) = self.refresh_loop.take() {
            let _ = stop_tx.send(());
            if let Err(err) = handle.await {
                warn!(error = %err, "otlp refresh loop ended abnormally");
            }
        }
        let provider = self.provider.clone();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .context("otlp shutdown task failed")?
            .map_err(|err| anyhow!("failed to shut down otlp meter provider: {err}"))?;
        info!("otlp metrics pusher stopped");
        Ok(())
    }
}

/// Collector endpoint with an explicit scheme, as tonic requires one.
fn collector_endpoint(config: &OtelConfig) -> Result<String> {
    let endpoint = config.endpoint.trim();
    if endpoint.is_empty() {
        return Err(anyhow!("otel endpoint is required"));
    }
    if endpoint.contains("://") {
        return Ok(endpoint.to_owned());
    }
    let scheme = if config.insecure { "http" } else { "https" };
    Ok(format!("{scheme}://{endpoint}"))
}

/// One refresh right away, then one per tick until `stop` fires.
async fn refresh_loop(
    service: SnapshotService,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = &mut stop => break,
            result = service.refresh() => match result {
                Ok((_, meta)) => debug!(
                    duration_seconds = meta.duration_seconds,
                    "otlp refresh completed"
                ),
                Err(err) => warn!(error = %err, "otlp refresh failed"),
            },
        }
    }
    debug!("otlp refresh loop stopped");
}
