//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Prometheus scrape adapter and self-instrumentation."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use prometheus::{GaugeVec, IntCounter, Opts, Registry};

/// Shared registry type for the exporter's own long-lived metrics.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics describing the exporter process itself.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: SharedRegistry,
    scrapes_total: IntCounter,
    scrape_errors_total: IntCounter,
    build_info: GaugeVec,
}

impl ExporterMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let scrapes_total = IntCounter::with_opts(Opts::new(
            "nls_exporter_scrapes_total",
            "Total number of metric scrapes served",
        ))?;
        registry.register(Box::new(scrapes_total.clone()))?;

        let scrape_errors_total = IntCounter::with_opts(Opts::new(
            "nls_exporter_scrape_errors_total",
            "Scrapes that could not serve any snapshot",
        ))?;
        registry.register(Box::new(scrape_errors_total.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "nls_exporter_build_info",
                "Build metadata for the running exporter binary",
            ),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            scrapes_total,
            scrape_errors_total,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_scrape(&self) {
        self.scrapes_total.inc();
    }

    pub fn inc_scrape_error(&self) {
        self.scrape_errors_total.inc();
    }

    pub fn set_build_info(&self, version: &str) {
        self.build_info.with_label_values(&[version]).set(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_self_metrics() {
        let metrics = ExporterMetrics::new(new_registry()).unwrap();
        metrics.inc_scrape();
        metrics.inc_scrape();
        metrics.inc_scrape_error();
        metrics.set_build_info("0.1.0");

        let families = metrics.registry().gather();
        let value = |name: &str| {
            families
                .iter()
                .find(|family| family.get_name() == name)
                .map(|family| family.get_metric()[0].get_counter().get_value())
        };
        assert_eq!(value("nls_exporter_scrapes_total"), Some(2.0));
        assert_eq!(value("nls_exporter_scrape_errors_total"), Some(1.0));
        assert!(families
            .iter()
            .any(|family| family.get_name() == "nls_exporter_build_info"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = new_registry();
        ExporterMetrics::new(registry.clone()).unwrap();
        assert!(ExporterMetrics::new(registry).is_err());
    }
}
