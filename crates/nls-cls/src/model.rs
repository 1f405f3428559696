//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Flattened, render-ready view of one complete fetch.
//!
//! Row order inside each collection is unspecified. Consumers key rows by
//! their label tuple, never by position.
#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Immutable result of one successful [`crate::ClsClient::fetch_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Wall-clock time (UTC) recorded right after virtual groups were listed.
    pub collected_at: DateTime<Utc>,
    /// One row per entitlement feature across all groups.
    pub entitlement_features: Vec<EntitlementFeatureRow>,
    /// One row per installed server feature.
    pub server_feature_capacity: Vec<ServerFeatureCapacityRow>,
    /// One row per server.
    pub server_usage: Vec<ServerUsageRow>,
    /// One row per known server that holds at least one lease.
    pub server_active_leases: Vec<ServerActiveLeaseRow>,
    /// Lease totals per server and feature.
    pub server_feature_active_leases: Vec<ServerFeatureActiveLeaseRow>,
    /// Sum of all counted lease seats.
    pub active_lease_total: f64,
    /// One row per pool feature.
    pub pool_usage: Vec<PoolUsageRow>,
}

/// Entitled quantities of a feature in a virtual group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntitlementFeatureRow {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub feature_name: String,
    pub feature_version: String,
    pub product_name: String,
    pub license_type: String,
    pub total_quantity: f64,
    pub in_use_quantity: f64,
    pub unassigned_quantity: f64,
}

/// Installed quantity of one feature on one server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerFeatureCapacityRow {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub server_id: String,
    pub server_name: String,
    pub server_status: String,
    pub deployed_on: String,
    pub leasing_mode: String,
    pub feature_name: String,
    pub product_name: String,
    pub license_type: String,
    pub total_quantity: f64,
}

/// Pool totals of a server.
///
/// `in_use` and `available` come from the pools unless the server holds
/// active leases, in which case the lease total replaces pool in-use.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerUsageRow {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub server_id: String,
    pub server_name: String,
    pub server_status: String,
    pub deployed_on: String,
    pub leasing_mode: String,
    pub allocated: f64,
    pub in_use: f64,
    pub available: f64,
}

/// Lease seats counted against a server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerActiveLeaseRow {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub server_id: String,
    pub server_name: String,
    pub active_leases: f64,
}

/// Lease seats per server and feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerFeatureActiveLeaseRow {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub server_id: String,
    pub server_name: String,
    pub feature_name: String,
    pub product_name: String,
    pub license_type: String,
    pub active_leases: f64,
}

/// Allocation of a feature inside one pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolUsageRow {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub server_id: String,
    pub server_name: String,
    pub pool_id: String,
    pub pool_name: String,
    pub feature_name: String,
    pub product_name: String,
    pub license_type: String,
    pub allocated: f64,
    pub in_use: f64,
    pub available: f64,
}
