//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Attribution and de-duplication of active leases.
//!
//! A group's leases are listed once per distinct service instance, and the
//! same lease may come back from several instances. Each response is first
//! resolved against the group's servers and features, then folded into a
//! [`LeaseLedger`] that counts every non-blank lease id once.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use nls_common::labels::UNKNOWN_LABEL;

use crate::api::{ActiveLeaseClient, LicenseServer, LicenseServerFeature};
use crate::model::{ServerActiveLeaseRow, ServerFeatureActiveLeaseRow};

/// Labels a lease is aggregated under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct FeatureKey {
    pub virtual_group_id: i64,
    pub virtual_group_name: String,
    pub server_id: String,
    pub server_name: String,
    pub feature_name: String,
    pub product_name: String,
    pub license_type: String,
}

/// One lease after server and feature resolution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedLease {
    /// Trimmed lease id, `None` when blank.
    pub lease_id: Option<String>,
    pub key: FeatureKey,
    pub count: f64,
}

/// Lookup tables for resolving one group's lease responses.
#[derive(Debug, Clone)]
pub(crate) struct GroupLeaseContext {
    pub virtual_group_id: i64,
    virtual_group_name: String,
    servers: HashMap<String, LicenseServer>,
    features_by_allotment: HashMap<String, LicenseServerFeature>,
    service_instance_ids: BTreeSet<String>,
}

impl GroupLeaseContext {
    /// Build the context for a group. Groups without servers have nothing to
    /// query and yield `None`.
    pub fn new(virtual_group_id: i64, servers: &[LicenseServer]) -> Option<Self> {
        let first = servers.first()?;
        let mut context = Self {
            virtual_group_id,
            virtual_group_name: first.virtual_group_name.clone(),
            servers: HashMap::with_capacity(servers.len()),
            features_by_allotment: HashMap::new(),
            service_instance_ids: BTreeSet::new(),
        };
        for server in servers {
            for feature in &server.license_server_features {
                context
                    .features_by_allotment
                    .insert(feature.id.clone(), feature.clone());
            }
            let instance = server.service_instance_id.trim();
            if !instance.is_empty() {
                context.service_instance_ids.insert(instance.to_owned());
            }
            context.servers.insert(server.id.clone(), server.clone());
        }
        Some(context)
    }

    /// Distinct non-blank service instances of the group's servers.
    pub fn service_instance_ids(&self) -> impl Iterator<Item = &str> {
        self.service_instance_ids.iter().map(String::as_str)
    }

    /// Resolve a lease listing. Clients whose server cannot be determined are
    /// skipped.
    pub fn resolve(&self, clients: &[ActiveLeaseClient]) -> Vec<ResolvedLease> {
        let mut resolved = Vec::new();
        for client in clients {
            let Some(server_id) = self.resolve_server_id(client) else {
                continue;
            };
            let server = self.servers.get(&server_id);
            let server_name = first_non_blank([
                client.additional_properties.license_server_name.as_str(),
                server.map(|s| s.name.as_str()).unwrap_or_default(),
                UNKNOWN_LABEL,
            ]);
            let virtual_group_name = first_non_blank([
                server
                    .map(|s| s.virtual_group_name.as_str())
                    .unwrap_or_default(),
                self.virtual_group_name.as_str(),
            ]);

            for lease in &client.leases {
                let feature = self
                    .features_by_allotment
                    .get(&lease.license_allotment_feature_id);
                let (feature_name, product_name, license_type) = feature
                    .map(|f| {
                        (
                            f.feature_name.as_str(),
                            f.product_name.as_str(),
                            f.license_type.as_str(),
                        )
                    })
                    .unwrap_or_default();
                let key = FeatureKey {
                    virtual_group_id: self.virtual_group_id,
                    virtual_group_name: virtual_group_name.clone(),
                    server_id: server_id.clone(),
                    server_name: server_name.clone(),
                    feature_name: first_non_blank([
                        lease.feature_name.as_str(),
                        feature_name,
                        UNKNOWN_LABEL,
                    ]),
                    product_name: first_non_blank([product_name, UNKNOWN_LABEL]),
                    license_type: first_non_blank([license_type, UNKNOWN_LABEL]),
                };
                let lease_id = lease.lease_id.trim();
                resolved.push(ResolvedLease {
                    lease_id: (!lease_id.is_empty()).then(|| lease_id.to_owned()),
                    key,
                    count: normalize_lease_count(lease.lease_count),
                });
            }
        }
        resolved
    }

    fn resolve_server_id(&self, client: &ActiveLeaseClient) -> Option<String> {
        let explicit = client.additional_properties.license_server_id.trim();
        if !explicit.is_empty() {
            return Some(explicit.to_owned());
        }
        if self.servers.len() == 1 {
            return self.servers.keys().next().cloned();
        }
        None
    }
}

/// Leases without a positive count still hold one seat.
pub(crate) fn normalize_lease_count(count: f64) -> f64 {
    if count > 0.0 {
        count
    } else {
        1.0
    }
}

fn first_non_blank<const N: usize>(candidates: [&str; N]) -> String {
    candidates
        .into_iter()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .unwrap_or_default()
        .to_owned()
}

/// Running lease totals across every group and service instance.
#[derive(Debug, Default)]
pub(crate) struct LeaseLedger {
    seen_lease_ids: HashSet<String>,
    server_totals: HashMap<String, f64>,
    feature_totals: BTreeMap<FeatureKey, f64>,
    total: f64,
}

/// Final lease aggregation for a snapshot.
#[derive(Debug, Default)]
pub(crate) struct LeaseTotals {
    /// Counted seats per server id, used to override pool in-use.
    pub by_server: HashMap<String, f64>,
    pub server_rows: Vec<ServerActiveLeaseRow>,
    pub feature_rows: Vec<ServerFeatureActiveLeaseRow>,
    pub total: f64,
}

impl LeaseLedger {
    /// Count resolved leases. A lease id already seen is ignored; leases
    /// without an id are always counted.
    pub fn record(&mut self, leases: Vec<ResolvedLease>) {
        for lease in leases {
            if let Some(id) = lease.lease_id {
                if !self.seen_lease_ids.insert(id) {
                    continue;
                }
            }
            *self
                .server_totals
                .entry(lease.key.server_id.clone())
                .or_default() += lease.count;
            *self.feature_totals.entry(lease.key).or_default() += lease.count;
            self.total += lease.count;
        }
    }

    /// Produce the snapshot rows. Per-server rows are emitted only for
    /// servers present in the group listings.
    pub fn finish(self, servers_by_group: &BTreeMap<i64, Vec<LicenseServer>>) -> LeaseTotals {
        let mut server_rows = Vec::with_capacity(self.server_totals.len());
        for (virtual_group_id, servers) in servers_by_group {
            for server in servers {
                let Some(count) = self.server_totals.get(&server.id) else {
                    continue;
                };
                server_rows.push(ServerActiveLeaseRow {
                    virtual_group_id: *virtual_group_id,
                    virtual_group_name: server.virtual_group_name.clone(),
                    server_id: server.id.clone(),
                    server_name: server.name.clone(),
                    active_leases: *count,
                });
            }
        }

        let feature_rows = self
            .feature_totals
            .into_iter()
            .map(|(key, count)| ServerFeatureActiveLeaseRow {
                virtual_group_id: key.virtual_group_id,
                virtual_group_name: key.virtual_group_name,
                server_id: key.server_id,
                server_name: key.server_name,
                feature_name: key.feature_name,
                product_name: key.product_name,
                license_type: key.license_type,
                active_leases: count,
            })
            .collect();

        LeaseTotals {
            by_server: self.server_totals,
            server_rows,
            feature_rows,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ActiveLease, ActiveLeaseProperties};

    fn server(id: &str, name: &str, instance: &str, features: &[(&str, &str)]) -> LicenseServer {
        LicenseServer {
            id: id.into(),
            name: name.into(),
            virtual_group_id: 5,
            virtual_group_name: "lab".into(),
            service_instance_id: instance.into(),
            license_server_features: features
                .iter()
                .map(|(id, name)| LicenseServerFeature {
                    id: (*id).into(),
                    feature_name: (*name).into(),
                    product_name: "vGPU".into(),
                    license_type: "CONCURRENT_COUNTED_SINGLE".into(),
                    total_quantity: 10.0,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn lease(id: &str, allotment: &str, count: f64) -> ActiveLease {
        ActiveLease {
            lease_id: id.into(),
            feature_name: String::new(),
            lease_count: count,
            license_allotment_feature_id: allotment.into(),
        }
    }

    fn client(server_id: &str, leases: Vec<ActiveLease>) -> ActiveLeaseClient {
        ActiveLeaseClient {
            leases,
            additional_properties: ActiveLeaseProperties {
                license_server_id: server_id.into(),
                license_server_name: String::new(),
            },
        }
    }

    #[test]
    fn context_collects_distinct_instances() {
        let servers = vec![
            server("a", "alpha", " si-1 ", &[]),
            server("b", "beta", "si-1", &[]),
            server("c", "gamma", "si-2", &[]),
            server("d", "delta", "  ", &[]),
        ];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let instances: Vec<_> = context.service_instance_ids().collect();
        assert_eq!(instances, vec!["si-1", "si-2"]);
        assert!(GroupLeaseContext::new(6, &[]).is_none());
    }

    #[test]
    fn sole_server_is_inferred_and_names_fall_back() {
        let servers = vec![server("a", "alpha", "si-1", &[("f-1", "vapps")])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let resolved = context.resolve(&[client(
            "",
            vec![lease("l-1", "f-1", 2.0), lease("", "missing", 0.0)],
        )]);

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].key.server_id, "a");
        assert_eq!(resolved[0].key.server_name, "alpha");
        assert_eq!(resolved[0].key.feature_name, "vapps");
        assert_eq!(resolved[0].key.product_name, "vGPU");
        assert_eq!(resolved[0].count, 2.0);
        assert_eq!(resolved[1].lease_id, None);
        assert_eq!(resolved[1].key.feature_name, UNKNOWN_LABEL);
        assert_eq!(resolved[1].key.license_type, UNKNOWN_LABEL);
        assert_eq!(resolved[1].count, 1.0);
    }

    #[test]
    fn unattributable_clients_are_skipped() {
        let servers = vec![server("a", "alpha", "si-1", &[]), server("b", "beta", "si-1", &[])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let resolved = context.resolve(&[client("   ", vec![lease("l-1", "f", 1.0)])]);
        assert!(resolved.is_empty());
    }

    #[test]
    fn client_supplied_server_name_wins() {
        let servers = vec![server("a", "alpha", "si-1", &[])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let mut named = client("a", vec![lease("l-1", "", 1.0)]);
        named.additional_properties.license_server_name = "edge-a".into();
        let resolved = context.resolve(&[named]);
        assert_eq!(resolved[0].key.server_name, "edge-a");
    }

    #[test]
    fn padded_names_resolve_to_the_same_feature_key() {
        let servers = vec![server("a", "alpha", "si-1", &[("f-1", "vapps")])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let mut padded = lease("l-1", "f-1", 1.0);
        padded.feature_name = "  vapps ".into();
        let mut named = client("a", vec![padded, lease("l-2", "f-1", 1.0)]);
        named.additional_properties.license_server_name = " alpha ".into();

        let resolved = context.resolve(&[named]);
        assert_eq!(resolved[0].key.feature_name, "vapps");
        assert_eq!(resolved[0].key.server_name, "alpha");
        assert_eq!(resolved[0].key, resolved[1].key);

        let mut ledger = LeaseLedger::default();
        ledger.record(resolved);
        let totals = ledger.finish(&BTreeMap::from([(5, servers)]));
        assert_eq!(totals.feature_rows.len(), 1);
        assert_eq!(totals.feature_rows[0].active_leases, 2.0);
    }

    #[test]
    fn ledger_counts_each_lease_id_once() {
        let servers = vec![server("a", "alpha", "si-1", &[("f-1", "vapps")])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let listing = [client("a", vec![lease("l-1", "f-1", 3.0)])];

        let mut ledger = LeaseLedger::default();
        ledger.record(context.resolve(&listing));
        ledger.record(context.resolve(&listing));

        let groups = BTreeMap::from([(5, servers)]);
        let totals = ledger.finish(&groups);
        assert_eq!(totals.total, 3.0);
        assert_eq!(totals.by_server["a"], 3.0);
        assert_eq!(totals.server_rows.len(), 1);
        assert_eq!(totals.server_rows[0].active_leases, 3.0);
        assert_eq!(totals.feature_rows.len(), 1);
        assert_eq!(totals.feature_rows[0].feature_name, "vapps");
    }

    #[test]
    fn leases_without_ids_are_never_deduplicated() {
        let servers = vec![server("a", "alpha", "si-1", &[])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let listing = [client("a", vec![lease(" ", "", 0.0)])];

        let mut ledger = LeaseLedger::default();
        ledger.record(context.resolve(&listing));
        ledger.record(context.resolve(&listing));
        let totals = ledger.finish(&BTreeMap::from([(5, servers)]));
        assert_eq!(totals.total, 2.0);
    }

    #[test]
    fn unknown_servers_count_but_get_no_server_row() {
        let servers = vec![server("a", "alpha", "si-1", &[]), server("b", "beta", "si-1", &[])];
        let context = GroupLeaseContext::new(5, &servers).unwrap();
        let mut ledger = LeaseLedger::default();
        ledger.record(context.resolve(&[client("ghost", vec![lease("l-9", "", 4.0)])]));

        let totals = ledger.finish(&BTreeMap::from([(5, servers)]));
        assert_eq!(totals.total, 4.0);
        assert!(totals.server_rows.is_empty());
        assert_eq!(totals.feature_rows[0].server_name, UNKNOWN_LABEL);
        assert_eq!(totals.feature_rows[0].virtual_group_name, "lab");
    }

    #[test]
    fn normalizes_non_positive_counts() {
        assert_eq!(normalize_lease_count(0.0), 1.0);
        assert_eq!(normalize_lease_count(-3.0), 1.0);
        assert_eq!(normalize_lease_count(2.5), 2.5);
    }
}
