//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "OTLP push adapter for the cached licensing snapshot."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
mod logging;
mod observations;
mod pusher;

pub use observations::{build_observations, Observation};
pub use pusher::MetricsPusher;
