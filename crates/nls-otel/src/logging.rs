//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Metric exporter decorator that logs each OTLP push."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::time::Instant;

use async_trait::async_trait;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{MetricResult, Temporality};
use tracing::{info, warn};

/// Wraps a push exporter and reports every export through `tracing`.
pub(crate) struct LoggingExporter<E> {
    inner: E,
    endpoint: String,
}

impl<E> LoggingExporter<E> {
    pub fn new(inner: E, endpoint: impl Into<String>) -> Self {
        Self {
            inner,
            endpoint: endpoint.into(),
        }
    }
}

fn metric_count(metrics: &ResourceMetrics) -> usize {
    metrics
        .scope_metrics
        .iter()
        .map(|scope| scope.metrics.len())
        .sum()
}

#[async_trait]
impl<E: PushMetricExporter> PushMetricExporter for LoggingExporter<E> {
    async fn export(&self, metrics: &mut ResourceMetrics) -> MetricResult<()> {
        let count = metric_count(metrics);
        let started = Instant::now();
        let result = self.inner.export(metrics).await;
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(()) => info!(
                endpoint = %self.endpoint,
                scopes = metrics.scope_metrics.len(),
                metrics = count,
                duration_seconds = elapsed,
                "otlp export succeeded"
            ),
            Err(err) => warn!(
                endpoint = %self.endpoint,
                metrics = count,
                duration_seconds = elapsed,
                error = %err,
                "otlp export failed"
            ),
        }
        result
    }

    async fn force_flush(&self) -> MetricResult<()> {
        self.inner.force_flush().await
    }

    fn shutdown(&self) -> MetricResult<()> {
        let result = self.inner.shutdown();
        if let Err(err) = &result {
            warn!(endpoint = %self.endpoint, error = %err, "otlp exporter shutdown failed");
        }
        result
    }

    fn temporality(&self) -> Temporality {
        self.inner.temporality()
    }
}
