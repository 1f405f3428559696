//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Prometheus scrape adapter and self-instrumentation."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use nls_snapshot::SnapshotService;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::exporter::ExporterMetrics;
use crate::families::{snapshot_samples, status_samples, Sample, ORG_LABEL};

/// Renders the cached snapshot on every scrape.
///
/// Gauges are rebuilt per scrape so servers and pools that disappear upstream
/// stop being exported immediately.
pub struct SnapshotCollector {
    service: SnapshotService,
    org_name: String,
    scrape_timeout: Duration,
    metrics: ExporterMetrics,
}

impl SnapshotCollector {
    pub fn new(
        service: SnapshotService,
        org_name: impl Into<String>,
        scrape_timeout: Duration,
        metrics: ExporterMetrics,
    ) -> Self {
        Self {
            service,
            org_name: org_name.into(),
            scrape_timeout,
            metrics,
        }
    }

    /// Gather snapshot families followed by the exporter's own metrics.
    pub async fn gather(&self) -> Result<Vec<MetricFamily>> {
        self.metrics.inc_scrape();
        let samples = match tokio::time::timeout(self.scrape_timeout, self.service.get()).await {
            Ok(Ok((snapshot, meta))) => snapshot_samples(&snapshot, &meta),
            Ok(Err(err)) => {
                warn!(error = %err, "cls scrape failed");
                self.degraded_samples()
            }
            Err(_) => {
                warn!(
                    timeout_seconds = self.scrape_timeout.as_secs_f64(),
                    "cls scrape timed out waiting for refresh"
                );
                self.degraded_samples()
            }
        };

        let mut families = render_samples(&self.org_name, &samples)?;
        families.extend(self.metrics.registry().gather());
        Ok(families)
    }

    /// Gather and encode in the Prometheus text format.
    pub async fn encode(&self) -> Result<String> {
        let families = self.gather().await?;
        Ok(TextEncoder::new().encode_to_string(&families)?)
    }

    fn degraded_samples(&self) -> Vec<Sample> {
        self.metrics.inc_scrape_error();
        let mut meta = self.service.meta();
        meta.up = 0.0;
        status_samples(&meta)
    }
}

/// Turn samples into gauge families on a throwaway registry. Families without
/// samples are omitted.
pub fn render_samples(org_name: &str, samples: &[Sample]) -> Result<Vec<MetricFamily>> {
    let registry = Registry::new();
    let mut gauges: HashMap<&'static str, GaugeVec> = HashMap::new();
    for sample in samples {
        let gauge = match gauges.entry(sample.family.name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let opts = Opts::new(sample.family.name, sample.family.help)
                    .const_label(ORG_LABEL, org_name);
                let gauge = GaugeVec::new(opts, sample.family.labels)?;
                registry.register(Box::new(gauge.clone()))?;
                entry.insert(gauge)
            }
        };
        let values: Vec<&str> = sample.labels.iter().map(String::as_str).collect();
        gauge.get_metric_with_label_values(&values)?.set(sample.value);
    }
    Ok(registry.gather())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::families::{ENTITLEMENT_TOTAL, UP};
    use nls_cls::{EntitlementFeatureRow, Snapshot};
    use nls_snapshot::Meta;

    #[test]
    fn renders_const_org_label() {
        let samples = vec![
            Sample {
                family: &UP,
                labels: Vec::new(),
                value: 1.0,
            },
            Sample {
                family: &ENTITLEMENT_TOTAL,
                labels: ["1", "prod", "vWS", "17.0", "RTX", "CONCURRENT"]
                    .map(String::from)
                    .to_vec(),
                value: 200.0,
            },
        ];
        let families = render_samples("acme", &samples).unwrap();
        let text = TextEncoder::new().encode_to_string(&families).unwrap();
        assert!(text.contains("nvidia_cls_up{org_name=\"acme\"} 1"));
        assert!(text.contains("feature_version=\"17.0\""));
        assert!(text.contains("} 200"));
    }

    #[test]
    fn duplicate_entitlement_rows_render_their_sum() {
        let row = EntitlementFeatureRow {
            virtual_group_id: 1,
            virtual_group_name: "prod".into(),
            feature_name: "vWS".into(),
            total_quantity: 100.0,
            ..Default::default()
        };
        let snapshot = Snapshot {
            entitlement_features: vec![
                row.clone(),
                EntitlementFeatureRow {
                    total_quantity: 50.0,
                    ..row
                },
            ],
            ..Default::default()
        };
        let samples = snapshot_samples(&snapshot, &Meta::default());
        let families = render_samples("acme", &samples).unwrap();
        let text = TextEncoder::new().encode_to_string(&families).unwrap();
        let totals: Vec<_> = text
            .lines()
            .filter(|line| line.starts_with("nvidia_cls_entitlement_total_quantity{"))
            .collect();
        assert_eq!(totals.len(), 1);
        assert!(totals[0].ends_with("} 150"));
    }

    #[test]
    fn no_samples_renders_nothing() {
        assert!(render_samples("acme", &[]).unwrap().is_empty());
    }
}
