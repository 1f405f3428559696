//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Metrics collection and export utilities."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
pub mod exporter;
pub mod families;
pub mod scrape;
pub mod server;

pub use exporter::{new_registry, ExporterMetrics, SharedRegistry};
pub use families::{snapshot_samples, status_samples, FamilySpec, Sample, ALL_FAMILIES, ORG_LABEL};
pub use prometheus;
pub use scrape::{render_samples, SnapshotCollector};
pub use server::{spawn_http_server, MetricsServer};
