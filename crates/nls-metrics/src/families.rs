//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Metric family catalogue and snapshot sample extraction."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
//! Protocol-neutral metric catalogue.
//!
//! Both the scrape endpoint and the OTLP pusher publish the same families with
//! the same label sets. [`snapshot_samples`] flattens a snapshot into
//! [`Sample`]s that each adapter then encodes in its own wire format.
use std::collections::HashMap;

use nls_cls::Snapshot;
use nls_common::{safe_label, unix_seconds};
use nls_snapshot::Meta;

/// Constant label carried by every family.
pub const ORG_LABEL: &str = "org_name";

/// Name, help text and variable label names of one gauge family.
#[derive(Debug, PartialEq, Eq)]
pub struct FamilySpec {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

const GROUP_FEATURE: &[&str] = &[
    "virtual_group_id",
    "virtual_group_name",
    "feature_name",
    "feature_version",
    "product_name",
    "license_type",
];
const SERVER: &[&str] = &["virtual_group_id", "virtual_group_name", "server_id", "server_name"];
const SERVER_INFO: &[&str] = &[
    "virtual_group_id",
    "virtual_group_name",
    "server_id",
    "server_name",
    "status",
    "deployed_on",
    "leasing_mode",
];
const SERVER_FEATURE: &[&str] = &[
    "virtual_group_id",
    "virtual_group_name",
    "server_id",
    "server_name",
    "feature_name",
    "product_name",
    "license_type",
];
const POOL_FEATURE: &[&str] = &[
    "virtual_group_id",
    "virtual_group_name",
    "server_id",
    "server_name",
    "pool_id",
    "pool_name",
    "feature_name",
    "product_name",
    "license_type",
];

pub const UP: FamilySpec = FamilySpec {
    name: "nvidia_cls_up",
    help: "Whether the NVIDIA CLS scrape is successful (1 = up, 0 = down).",
    labels: &[],
};
pub const SCRAPE_DURATION: FamilySpec = FamilySpec {
    name: "nvidia_cls_scrape_duration_seconds",
    help: "Time spent querying NVIDIA CLS APIs.",
    labels: &[],
};
pub const SCRAPE_TIMESTAMP: FamilySpec = FamilySpec {
    name: "nvidia_cls_scrape_timestamp_seconds",
    help: "Unix timestamp for when the scrape snapshot was collected.",
    labels: &[],
};
pub const CACHE_HIT: FamilySpec = FamilySpec {
    name: "nvidia_cls_cache_hit",
    help: "Whether the served snapshot came from the cache (1) or a refresh (0).",
    labels: &[],
};
pub const ENTITLEMENT_TOTAL: FamilySpec = FamilySpec {
    name: "nvidia_cls_entitlement_total_quantity",
    help: "Total entitlement quantity by virtual group and feature (contract capacity).",
    labels: GROUP_FEATURE,
};
pub const ENTITLEMENT_IN_USE: FamilySpec = FamilySpec {
    name: "nvidia_cls_entitlement_in_use_quantity",
    help: "Entitlement quantity in use by virtual group and feature.",
    labels: GROUP_FEATURE,
};
pub const ENTITLEMENT_UNASSIGNED: FamilySpec = FamilySpec {
    name: "nvidia_cls_entitlement_unassigned_quantity",
    help: "Entitlement quantity not assigned to any license server.",
    labels: GROUP_FEATURE,
};
pub const SERVER_INFO_FAMILY: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_info",
    help: "Static information about a license server.",
    labels: SERVER_INFO,
};
pub const SERVER_FEATURE_TOTAL: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_feature_total_quantity",
    help: "Total server feature capacity from license-server features.",
    labels: SERVER_FEATURE,
};
pub const SERVER_FEATURE_ACTIVE: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_feature_active_leases",
    help: "Active lease count by server feature from CLS active-lease data.",
    labels: SERVER_FEATURE,
};
pub const SERVER_ALLOCATED: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_allocated_quantity",
    help: "Quantity allotted to the pools of a license server.",
    labels: SERVER,
};
pub const SERVER_IN_USE: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_in_use_quantity",
    help: "Quantity in use on a license server; active leases override pool usage when present.",
    labels: SERVER,
};
pub const SERVER_AVAILABLE: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_available_quantity",
    help: "Allocated quantity still available on a license server.",
    labels: SERVER,
};
pub const SERVER_ACTIVE_LEASES: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_server_active_leases",
    help: "Active lease count per license server.",
    labels: SERVER,
};
pub const ACTIVE_LEASES_TOTAL: FamilySpec = FamilySpec {
    name: "nvidia_cls_active_leases_total",
    help: "Active leases across the organisation, each lease id counted once.",
    labels: &[],
};
pub const POOL_ALLOCATED: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_pool_allocated_quantity",
    help: "Quantity allotted to a license pool feature.",
    labels: POOL_FEATURE,
};
pub const POOL_IN_USE: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_pool_in_use_quantity",
    help: "Quantity in use in a license pool feature.",
    labels: POOL_FEATURE,
};
pub const POOL_AVAILABLE: FamilySpec = FamilySpec {
    name: "nvidia_cls_license_pool_available_quantity",
    help: "Quantity still available in a license pool feature.",
    labels: POOL_FEATURE,
};

/// Every family published from a snapshot, in rendering order.
pub const ALL_FAMILIES: &[&FamilySpec] = &[
    &UP,
    &SCRAPE_DURATION,
    &SCRAPE_TIMESTAMP,
    &CACHE_HIT,
    &ENTITLEMENT_TOTAL,
    &ENTITLEMENT_IN_USE,
    &ENTITLEMENT_UNASSIGNED,
    &SERVER_INFO_FAMILY,
    &SERVER_FEATURE_TOTAL,
    &SERVER_FEATURE_ACTIVE,
    &SERVER_ALLOCATED,
    &SERVER_IN_USE,
    &SERVER_AVAILABLE,
    &SERVER_ACTIVE_LEASES,
    &ACTIVE_LEASES_TOTAL,
    &POOL_ALLOCATED,
    &POOL_IN_USE,
    &POOL_AVAILABLE,
];

/// One gauge value. `labels` lines up with `family.labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub family: &'static FamilySpec,
    pub labels: Vec<String>,
    pub value: f64,
}

impl Sample {
    fn new(family: &'static FamilySpec, labels: Vec<String>, value: f64) -> Self {
        debug_assert_eq!(family.labels.len(), labels.len(), "{}", family.name);
        Self {
            family,
            labels,
            value,
        }
    }

    /// Label name/value pairs in declaration order.
    pub fn label_pairs(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.family
            .labels
            .iter()
            .copied()
            .zip(self.labels.iter().map(String::as_str))
    }
}

/// Status gauges only. Used when no snapshot can be served; the timestamp is
/// omitted while unknown.
pub fn status_samples(meta: &Meta) -> Vec<Sample> {
    let mut samples = vec![
        Sample::new(&UP, Vec::new(), meta.up),
        Sample::new(&SCRAPE_DURATION, Vec::new(), meta.duration_seconds),
    ];
    if let Some(timestamp) = meta.timestamp {
        samples.push(Sample::new(&SCRAPE_TIMESTAMP, Vec::new(), unix_seconds(timestamp)));
    }
    samples
}

/// Flatten a snapshot and its meta into samples for every family.
pub fn snapshot_samples(snapshot: &Snapshot, meta: &Meta) -> Vec<Sample> {
    let mut samples = status_samples(meta);
    samples.push(Sample::new(
        &CACHE_HIT,
        Vec::new(),
        if meta.cache_hit { 1.0 } else { 0.0 },
    ));

    for row in &snapshot.entitlement_features {
        let labels = vec![
            row.virtual_group_id.to_string(),
            safe_label(&row.virtual_group_name),
            safe_label(&row.feature_name),
            safe_label(&row.feature_version),
            safe_label(&row.product_name),
            safe_label(&row.license_type),
        ];
        samples.push(Sample::new(&ENTITLEMENT_TOTAL, labels.clone(), row.total_quantity));
        samples.push(Sample::new(&ENTITLEMENT_IN_USE, labels.clone(), row.in_use_quantity));
        samples.push(Sample::new(&ENTITLEMENT_UNASSIGNED, labels, row.unassigned_quantity));
    }

    for row in &snapshot.server_usage {
        let info = vec![
            row.virtual_group_id.to_string(),
            safe_label(&row.virtual_group_name),
            safe_label(&row.server_id),
            safe_label(&row.server_name),
            safe_label(&row.server_status),
            safe_label(&row.deployed_on),
            safe_label(&row.leasing_mode),
        ];
        let server = info[..4].to_vec();
        samples.push(Sample::new(&SERVER_INFO_FAMILY, info, 1.0));
        samples.push(Sample::new(&SERVER_ALLOCATED, server.clone(), row.allocated));
        samples.push(Sample::new(&SERVER_IN_USE, server.clone(), row.in_use));
        samples.push(Sample::new(&SERVER_AVAILABLE, server, row.available));
    }

    for row in &snapshot.server_feature_capacity {
        let labels = vec![
            row.virtual_group_id.to_string(),
            safe_label(&row.virtual_group_name),
            safe_label(&row.server_id),
            safe_label(&row.server_name),
            safe_label(&row.feature_name),
            safe_label(&row.product_name),
            safe_label(&row.license_type),
        ];
        samples.push(Sample::new(&SERVER_FEATURE_TOTAL, labels, row.total_quantity));
    }

    for row in &snapshot.server_feature_active_leases {
        let labels = vec![
            row.virtual_group_id.to_string(),
            safe_label(&row.virtual_group_name),
            safe_label(&row.server_id),
            safe_label(&row.server_name),
            safe_label(&row.feature_name),
            safe_label(&row.product_name),
            safe_label(&row.license_type),
        ];
        samples.push(Sample::new(&SERVER_FEATURE_ACTIVE, labels, row.active_leases));
    }

    for row in &snapshot.server_active_leases {
        let labels = vec![
            row.virtual_group_id.to_string(),
            safe_label(&row.virtual_group_name),
            safe_label(&row.server_id),
            safe_label(&row.server_name),
        ];
        samples.push(Sample::new(&SERVER_ACTIVE_LEASES, labels, row.active_leases));
    }

    samples.push(Sample::new(
        &ACTIVE_LEASES_TOTAL,
        Vec::new(),
        snapshot.active_lease_total,
    ));

    for row in &snapshot.pool_usage {
        let labels = vec![
            row.virtual_group_id.to_string(),
            safe_label(&row.virtual_group_name),
            safe_label(&row.server_id),
            safe_label(&row.server_name),
            safe_label(&row.pool_id),
            safe_label(&row.pool_name),
            safe_label(&row.feature_name),
            safe_label(&row.product_name),
            safe_label(&row.license_type),
        ];
        samples.push(Sample::new(&POOL_ALLOCATED, labels.clone(), row.allocated));
        samples.push(Sample::new(&POOL_IN_USE, labels.clone(), row.in_use));
        samples.push(Sample::new(&POOL_AVAILABLE, labels, row.available));
    }

    merge_duplicates(samples)
}

/// Rows that collapse onto one label set after label cleaning are summed,
/// keeping first-seen order. Info gauges stay at 1.
fn merge_duplicates(samples: Vec<Sample>) -> Vec<Sample> {
    let mut merged: Vec<Sample> = Vec::with_capacity(samples.len());
    let mut seen: HashMap<(&'static str, Vec<String>), usize> = HashMap::new();
    for sample in samples {
        match seen.get(&(sample.family.name, sample.labels.clone())) {
            Some(&index) if sample.family.name == SERVER_INFO_FAMILY.name => {
                merged[index].value = 1.0;
            }
            Some(&index) => merged[index].value += sample.value,
            None => {
                seen.insert((sample.family.name, sample.labels.clone()), merged.len());
                merged.push(sample);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use nls_cls::{EntitlementFeatureRow, PoolUsageRow, ServerUsageRow};

    fn find<'a>(samples: &'a [Sample], family: &FamilySpec) -> Vec<&'a Sample> {
        samples
            .iter()
            .filter(|sample| sample.family.name == family.name)
            .collect()
    }

    #[test]
    fn family_names_are_unique() {
        let mut names: Vec<_> = ALL_FAMILIES.iter().map(|family| family.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_FAMILIES.len());
    }

    #[test]
    fn status_samples_skip_unknown_timestamp() {
        let samples = status_samples(&Meta::default());
        assert_eq!(samples.len(), 2);
        assert!(find(&samples, &SCRAPE_TIMESTAMP).is_empty());
    }

    #[test]
    fn blank_labels_render_as_unknown() {
        let snapshot = Snapshot {
            server_usage: vec![ServerUsageRow {
                virtual_group_id: 4,
                server_id: "srv".into(),
                server_name: "  ".into(),
                allocated: 10.0,
                in_use: 3.0,
                available: 7.0,
                ..Default::default()
            }],
            ..Default::default()
        };
        let samples = snapshot_samples(&snapshot, &Meta::default());

        let info = find(&samples, &SERVER_INFO_FAMILY);
        assert_eq!(info.len(), 1);
        let pairs: Vec<_> = info[0].label_pairs().collect();
        assert_eq!(pairs[0], ("virtual_group_id", "4"));
        assert_eq!(pairs[1], ("virtual_group_name", "unknown"));
        assert_eq!(pairs[3], ("server_name", "unknown"));
        assert_eq!(pairs[4], ("status", "unknown"));

        let available = find(&samples, &SERVER_AVAILABLE);
        assert_eq!(available[0].value, 7.0);
        assert_eq!(available[0].labels.len(), SERVER_AVAILABLE.labels.len());
    }

    #[test]
    fn pool_rows_emit_three_gauges() {
        let snapshot = Snapshot {
            pool_usage: vec![PoolUsageRow {
                pool_id: "p1".into(),
                allocated: 50.0,
                in_use: 80.0,
                available: 0.0,
                ..Default::default()
            }],
            active_lease_total: 4.0,
            ..Default::default()
        };
        let meta = Meta {
            up: 1.0,
            cache_hit: true,
            ..Meta::default()
        };
        let samples = snapshot_samples(&snapshot, &meta);
        assert_eq!(find(&samples, &POOL_ALLOCATED)[0].value, 50.0);
        assert_eq!(find(&samples, &POOL_IN_USE)[0].value, 80.0);
        assert_eq!(find(&samples, &POOL_AVAILABLE)[0].value, 0.0);
        assert_eq!(find(&samples, &ACTIVE_LEASES_TOTAL)[0].value, 4.0);
        assert_eq!(find(&samples, &CACHE_HIT)[0].value, 1.0);
    }

    #[test]
    fn rows_sharing_a_label_set_are_summed() {
        let row = EntitlementFeatureRow {
            virtual_group_id: 3,
            virtual_group_name: "prod".into(),
            feature_name: "vWS".into(),
            total_quantity: 100.0,
            in_use_quantity: 10.0,
            unassigned_quantity: 5.0,
            ..Default::default()
        };
        let padded = EntitlementFeatureRow {
            feature_name: " vWS ".into(),
            total_quantity: 50.0,
            in_use_quantity: 2.0,
            unassigned_quantity: 1.0,
            ..row.clone()
        };
        let server = ServerUsageRow {
            server_id: "srv".into(),
            allocated: 4.0,
            ..Default::default()
        };
        let snapshot = Snapshot {
            entitlement_features: vec![row, padded],
            server_usage: vec![server.clone(), server],
            ..Default::default()
        };
        let samples = snapshot_samples(&snapshot, &Meta::default());

        let total = find(&samples, &ENTITLEMENT_TOTAL);
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].value, 150.0);
        assert_eq!(find(&samples, &ENTITLEMENT_IN_USE)[0].value, 12.0);
        assert_eq!(find(&samples, &ENTITLEMENT_UNASSIGNED)[0].value, 6.0);

        let info = find(&samples, &SERVER_INFO_FAMILY);
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].value, 1.0);
        assert_eq!(find(&samples, &SERVER_ALLOCATED)[0].value, 8.0);
    }
}
