//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Snapshot cache shared by the scrape and push paths."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure of a refresh that had no earlier snapshot to fall back to.
///
/// Cloneable so every caller coalesced onto one refresh receives the same
/// error value.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// The fetcher returned an error.
    #[error("snapshot fetch failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),
    /// The refresh did not finish within the configured bound.
    #[error("snapshot refresh timed out after {0:?}")]
    Timeout(Duration),
    /// The refresh task panicked or was cancelled by the runtime.
    #[error("snapshot refresh aborted: {0}")]
    Aborted(String),
}
