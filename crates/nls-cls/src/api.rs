//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Wire payloads returned by the licensing API.
//!
//! Every field defaults when absent or `null`, and unknown fields are
//! ignored, so partial documents from the API still decode.
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

/// Body of `GET /v1/org/{org}/virtual-groups`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualGroupsResponse {
    /// Groups visible to the organisation.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub virtual_groups: Vec<VirtualGroup>,
}

/// Organisational container for license servers and entitlements.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualGroup {
    /// Numeric group id.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub id: i64,
    /// Display name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub name: String,
    /// Entitlement summaries attached to the group.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub entitlements: Vec<EntitlementSummary>,
}

/// One entitlement of a virtual group.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitlementSummary {
    /// Product keys under this entitlement.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub entitlement_product_keys: Vec<EntitlementProductKey>,
}

/// A product key and the features it grants.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitlementProductKey {
    /// Features granted by the key.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub entitlement_features: Vec<EntitlementFeature>,
}

/// Entitled quantity of one feature.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitlementFeature {
    /// Feature name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub feature_name: String,
    /// Feature version.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub feature_version: String,
    /// Product name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub product_name: String,
    /// License type.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_type: String,
    /// Entitled quantity.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub total_quantity: f64,
    /// Quantity in use across the group.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub in_use_quantity: f64,
    /// Quantity not assigned to any server.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub unassigned_quantity: f64,
}

/// Body of `GET .../virtual-groups/{vg}/license-servers`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicenseServersResponse {
    /// Servers in the group.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_servers: Vec<LicenseServer>,
}

/// A license server hosting pools and serving leases.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicenseServer {
    /// Server id.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub id: String,
    /// Display name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub name: String,
    /// Lifecycle status reported by the API.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub status: String,
    /// Owning group id, `0` when omitted.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub virtual_group_id: i64,
    /// Owning group name, empty when omitted.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub virtual_group_name: String,
    /// Deployment target.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub deployed_on: String,
    /// Leasing mode.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub leasing_mode: String,
    /// Service instance that answers lease queries for this server.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub service_instance_id: String,
    /// Feature capacity installed on the server.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_server_features: Vec<LicenseServerFeature>,
}

/// Feature capacity installed on a server.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicenseServerFeature {
    /// Feature id, referenced by pool features and leases.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub id: String,
    /// Feature name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub feature_name: String,
    /// Product name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub product_name: String,
    /// License type.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_type: String,
    /// Installed quantity.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub total_quantity: f64,
}

/// Body of `GET .../license-servers/{id}/license-pools`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicensePoolsResponse {
    /// Pools on the server.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_pools: Vec<LicensePool>,
}

/// Allocation bucket inside a server.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicensePool {
    /// Pool id.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub id: String,
    /// Display name.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub name: String,
    /// Per-feature allotments.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_pool_features: Vec<LicensePoolFeature>,
}

/// Allotment of one server feature to a pool.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicensePoolFeature {
    /// Id of the [`LicenseServerFeature`] being allotted.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_server_feature_id: String,
    /// Quantity allotted to the pool.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub total_allotment: f64,
    /// Quantity in use as reported by the pool.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub in_use: f64,
}

/// Body of `GET .../virtual-groups/{vg}/leases`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveLeasesResponse {
    /// Clients holding leases.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub clients: Vec<ActiveLeaseClient>,
}

/// A licensed client and the leases it holds.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveLeaseClient {
    /// Leases held by the client.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub leases: Vec<ActiveLease>,
    /// Server attribution for the leases.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub additional_properties: ActiveLeaseProperties,
}

/// One lease.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveLease {
    /// Lease id, used for de-duplication when non-blank.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub lease_id: String,
    /// Feature name as reported on the lease.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub feature_name: String,
    /// Seats held; non-positive counts as one.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub lease_count: f64,
    /// Id of the [`LicenseServerFeature`] backing the lease.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_allotment_feature_id: String,
}

/// Server attribution attached to a lease client. The API uses snake_case here.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveLeaseProperties {
    /// Server id, possibly blank.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_server_id: String,
    /// Server name, possibly blank.
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub license_server_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerates_nulls_and_unknown_fields() {
        let body = r#"{
            "licenseServers": [{
                "id": "srv-1",
                "name": null,
                "virtualGroupId": 12,
                "licenseServerFeatures": null,
                "somethingNew": {"nested": true}
            }],
            "paging": {"next": null}
        }"#;
        let decoded: LicenseServersResponse = serde_json::from_str(body).unwrap();
        let server = &decoded.license_servers[0];
        assert_eq!(server.id, "srv-1");
        assert_eq!(server.name, "");
        assert_eq!(server.virtual_group_id, 12);
        assert!(server.license_server_features.is_empty());
    }

    #[test]
    fn lease_properties_use_snake_case_keys() {
        let body = r#"{
            "clients": [{
                "leases": [{"leaseId": "l-1", "leaseCount": 2, "licenseAllotmentFeatureId": "f-1"}],
                "additionalProperties": {"license_server_id": "srv-9", "license_server_name": "edge"}
            }]
        }"#;
        let decoded: ActiveLeasesResponse = serde_json::from_str(body).unwrap();
        let client = &decoded.clients[0];
        assert_eq!(client.additional_properties.license_server_id, "srv-9");
        assert_eq!(client.additional_properties.license_server_name, "edge");
        assert_eq!(client.leases[0].lease_count, 2.0);
        assert_eq!(client.leases[0].feature_name, "");
    }

    #[test]
    fn missing_collections_decode_empty() {
        let decoded: VirtualGroupsResponse = serde_json::from_str("{}").unwrap();
        assert!(decoded.virtual_groups.is_empty());
    }
}
