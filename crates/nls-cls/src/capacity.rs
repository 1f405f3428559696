//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::collections::HashMap;

use crate::api::{LicensePool, LicenseServer, LicenseServerFeature, VirtualGroup};
use crate::model::{EntitlementFeatureRow, PoolUsageRow, ServerFeatureCapacityRow, ServerUsageRow};

/// Rows derived from one server and its pools.
#[derive(Debug, Default)]
pub(crate) struct ServerCapacity {
    pub feature_capacity: Vec<ServerFeatureCapacityRow>,
    pub pool_usage: Vec<PoolUsageRow>,
    pub usage: ServerUsageRow,
}

/// Flatten the entitlement tree of every group into rows.
pub(crate) fn entitlement_rows(groups: &[VirtualGroup]) -> Vec<EntitlementFeatureRow> {
    groups
        .iter()
        .flat_map(|group| {
            group
                .entitlements
                .iter()
                .flat_map(|entitlement| &entitlement.entitlement_product_keys)
                .flat_map(|key| &key.entitlement_features)
                .map(move |feature| EntitlementFeatureRow {
                    virtual_group_id: group.id,
                    virtual_group_name: group.name.clone(),
                    feature_name: feature.feature_name.clone(),
                    feature_version: feature.feature_version.clone(),
                    product_name: feature.product_name.clone(),
                    license_type: feature.license_type.clone(),
                    total_quantity: feature.total_quantity,
                    in_use_quantity: feature.in_use_quantity,
                    unassigned_quantity: feature.unassigned_quantity,
                })
        })
        .collect()
}

/// Aggregate a server's installed features and pool allotments.
///
/// When `active_leases` is known for the server it replaces the pool in-use
/// total, and availability is recomputed against it.
pub(crate) fn server_capacity(
    server: &LicenseServer,
    pools: &[LicensePool],
    active_leases: Option<f64>,
) -> ServerCapacity {
    let features_by_id: HashMap<&str, &LicenseServerFeature> = server
        .license_server_features
        .iter()
        .map(|feature| (feature.id.as_str(), feature))
        .collect();

    let feature_capacity = server
        .license_server_features
        .iter()
        .map(|feature| ServerFeatureCapacityRow {
            virtual_group_id: server.virtual_group_id,
            virtual_group_name: server.virtual_group_name.clone(),
            server_id: server.id.clone(),
            server_name: server.name.clone(),
            server_status: server.status.clone(),
            deployed_on: server.deployed_on.clone(),
            leasing_mode: server.leasing_mode.clone(),
            feature_name: feature.feature_name.clone(),
            product_name: feature.product_name.clone(),
            license_type: feature.license_type.clone(),
            total_quantity: feature.total_quantity,
        })
        .collect();

    let mut allocated_total = 0.0;
    let mut in_use_total = 0.0;
    let mut pool_usage = Vec::new();
    for pool in pools {
        for allotment in &pool.license_pool_features {
            let feature = features_by_id
                .get(allotment.license_server_feature_id.as_str())
                .copied();
            let (feature_name, product_name, license_type) = feature
                .map(|f| {
                    (
                        f.feature_name.clone(),
                        f.product_name.clone(),
                        f.license_type.clone(),
                    )
                })
                .unwrap_or_default();
            allocated_total += allotment.total_allotment;
            in_use_total += allotment.in_use;
            pool_usage.push(PoolUsageRow {
                virtual_group_id: server.virtual_group_id,
                virtual_group_name: server.virtual_group_name.clone(),
                server_id: server.id.clone(),
                server_name: server.name.clone(),
                pool_id: pool.id.clone(),
                pool_name: pool.name.clone(),
                feature_name,
                product_name,
                license_type,
                allocated: allotment.total_allotment,
                in_use: allotment.in_use,
                available: available(allotment.total_allotment, allotment.in_use),
            });
        }
    }

    let in_use = active_leases.unwrap_or(in_use_total);
    let usage = ServerUsageRow {
        virtual_group_id: server.virtual_group_id,
        virtual_group_name: server.virtual_group_name.clone(),
        server_id: server.id.clone(),
        server_name: server.name.clone(),
        server_status: server.status.clone(),
        deployed_on: server.deployed_on.clone(),
        leasing_mode: server.leasing_mode.clone(),
        allocated: allocated_total,
        in_use,
        available: available(allocated_total, in_use),
    };

    ServerCapacity {
        feature_capacity,
        pool_usage,
        usage,
    }
}

fn available(allocated: f64, in_use: f64) -> f64 {
    (allocated - in_use).max(0.0)
}
