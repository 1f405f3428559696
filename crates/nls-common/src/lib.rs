//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Shared primitives and utilities for the exporter runtime."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Core shared primitives for the license server exporter workspace.
//! This crate exposes configuration loading, duration parsing, label
//! hygiene, and tracing bootstrap consumed across the workspace.

pub mod config;
pub mod labels;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, CacheConfig, ExporterConfig, HttpConfig, LoggingConfig, OtelConfig,
};
pub use labels::safe_label;
pub use logging::{init_tracing, LogFormat};
pub use time::{parse_duration, unix_seconds};
