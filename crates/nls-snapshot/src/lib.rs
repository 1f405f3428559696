//! ---
//! nls_section: "01-core-functionality"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Snapshot cache shared by the scrape and push paths."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Shared snapshot cache.
//!
//! One [`SnapshotService`] is built at startup and handed to every consumer.
//! It serves cached snapshots within a TTL, collapses concurrent refreshes into
//! a single upstream fetch, and keeps serving the last good snapshot (marked
//! `up = 0`) when a refresh fails.
#![warn(missing_docs)]

mod error;
mod fetcher;
mod service;

pub use error::SnapshotError;
pub use fetcher::SnapshotFetcher;
pub use nls_cls::Snapshot;
pub use service::{Meta, SnapshotService, DEFAULT_CACHE_TTL, DEFAULT_REFRESH_TIMEOUT};
