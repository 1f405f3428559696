//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Client for the cloud license service API.
//!
//! [`ClsClient::fetch_snapshot`] walks virtual groups, their license servers,
//! active leases and license pools with bounded concurrency and folds the
//! results into one immutable [`Snapshot`]. Any failed sub-request aborts the
//! whole walk; a partial snapshot is never returned.
#![warn(missing_docs)]

pub mod api;
mod capacity;
pub mod client;
pub mod error;
mod leases;
pub mod model;
pub mod task_group;

pub use client::{ClientConfig, ClsClient, SERVICE_INSTANCE_HEADER};
pub use error::ClsError;
pub use model::{
    EntitlementFeatureRow, PoolUsageRow, ServerActiveLeaseRow, ServerFeatureActiveLeaseRow,
    ServerFeatureCapacityRow, ServerUsageRow, Snapshot,
};
pub use task_group::TaskGroup;
