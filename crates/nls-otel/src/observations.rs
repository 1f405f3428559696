//! ---
//! nls_section: "03-persistence-logging"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Mapping from snapshots to OTLP gauge observations."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use nls_cls::Snapshot;
use nls_metrics::{snapshot_samples, ORG_LABEL};
use nls_snapshot::Meta;
use opentelemetry::KeyValue;
use parking_lot::Mutex;

/// One gauge reading with its full attribute set, `org_name` first.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: &'static str,
    pub value: f64,
    pub attributes: Vec<KeyValue>,
}

/// Every observation a collection cycle reports for `snapshot`.
pub fn build_observations(org_name: &str, snapshot: &Snapshot, meta: &Meta) -> Vec<Observation> {
    snapshot_samples(snapshot, meta)
        .into_iter()
        .map(|sample| {
            let mut attributes = Vec::with_capacity(sample.labels.len() + 1);
            attributes.push(KeyValue::new(ORG_LABEL, org_name.to_owned()));
            attributes.extend(
                sample
                    .label_pairs()
                    .map(|(key, value)| KeyValue::new(key, value.to_owned())),
            );
            Observation {
                name: sample.family.name,
                value: sample.value,
                attributes,
            }
        })
        .collect()
}

/// Observations of one snapshot, grouped by family name.
pub(crate) type FamilyObservations = HashMap<&'static str, Vec<Observation>>;

/// Shares one flattening of the cached snapshot across every gauge callback
/// of a collection cycle.
///
/// Entries are keyed by snapshot identity and meta; a new refresh or a change
/// in up/cache-hit state rebuilds them.
pub(crate) struct ObservationCache {
    org_name: Arc<str>,
    last: Mutex<Option<CachedObservations>>,
}

struct CachedObservations {
    snapshot: Arc<Snapshot>,
    meta: Meta,
    by_family: Arc<FamilyObservations>,
}

impl ObservationCache {
    pub fn new(org_name: &str) -> Self {
        Self {
            org_name: Arc::from(org_name),
            last: Mutex::new(None),
        }
    }

    pub fn observations(&self, snapshot: &Arc<Snapshot>, meta: &Meta) -> Arc<FamilyObservations> {
        let mut last = self.last.lock();
        if let Some(cached) = last.as_ref() {
            if Arc::ptr_eq(&cached.snapshot, snapshot) && cached.meta == *meta {
                return Arc::clone(&cached.by_family);
            }
        }

        let mut by_family = FamilyObservations::new();
        for observation in build_observations(&self.org_name, snapshot, meta) {
            by_family
                .entry(observation.name)
                .or_default()
                .push(observation);
        }
        let by_family = Arc::new(by_family);
        *last = Some(CachedObservations {
            snapshot: Arc::clone(snapshot),
            meta: *meta,
            by_family: Arc::clone(&by_family),
        });
        by_family
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use nls_cls::{EntitlementFeatureRow, ServerActiveLeaseRow};

    fn attribute(observation: &Observation, key: &str) -> Option<String> {
        observation
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            collected_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            entitlement_features: vec![EntitlementFeatureRow {
                virtual_group_id: 7,
                virtual_group_name: "prod".into(),
                feature_name: "vWS".into(),
                feature_version: String::new(),
                product_name: "RTX".into(),
                license_type: "CONCURRENT".into(),
                total_quantity: 200.0,
                in_use_quantity: 40.0,
                unassigned_quantity: 10.0,
            }],
            server_active_leases: vec![ServerActiveLeaseRow {
                virtual_group_id: 7,
                virtual_group_name: "prod".into(),
                server_id: "srv-a".into(),
                server_name: "Server A".into(),
                active_leases: 3.0,
            }],
            active_lease_total: 3.0,
            ..Default::default()
        }
    }

    #[test]
    fn observations_carry_org_and_row_attributes() {
        let snapshot = sample_snapshot();
        let meta = Meta {
            up: 1.0,
            duration_seconds: 0.25,
            timestamp: Some(snapshot.collected_at),
            cache_hit: false,
        };
        let observations = build_observations("acme", &snapshot, &meta);

        let entitlement = observations
            .iter()
            .find(|o| o.name == "nvidia_cls_entitlement_total_quantity")
            .unwrap();
        assert_eq!(entitlement.value, 200.0);
        assert_eq!(entitlement.attributes[0].key.as_str(), "org_name");
        assert_eq!(attribute(entitlement, "org_name").as_deref(), Some("acme"));
        assert_eq!(attribute(entitlement, "virtual_group_id").as_deref(), Some("7"));
        assert_eq!(
            attribute(entitlement, "feature_version").as_deref(),
            Some("unknown")
        );

        let leases = observations
            .iter()
            .find(|o| o.name == "nvidia_cls_license_server_active_leases")
            .unwrap();
        assert_eq!(leases.value, 3.0);
        assert_eq!(attribute(leases, "server_id").as_deref(), Some("srv-a"));

        let timestamp = observations
            .iter()
            .find(|o| o.name == "nvidia_cls_scrape_timestamp_seconds")
            .unwrap();
        assert_eq!(timestamp.value, 1_714_564_800.0);
        assert_eq!(timestamp.attributes.len(), 1);
    }

    #[test]
    fn stale_meta_reports_down_with_cached_rows() {
        let snapshot = sample_snapshot();
        let meta = Meta {
            up: 0.0,
            duration_seconds: 1.5,
            timestamp: Some(snapshot.collected_at),
            cache_hit: false,
        };
        let observations = build_observations("acme", &snapshot, &meta);

        let up = observations
            .iter()
            .find(|o| o.name == "nvidia_cls_up")
            .unwrap();
        assert_eq!(up.value, 0.0);
        assert!(observations
            .iter()
            .any(|o| o.name == "nvidia_cls_entitlement_unassigned_quantity" && o.value == 10.0));
    }

    #[test]
    fn cache_reuses_observations_until_snapshot_or_meta_changes() {
        let cache = ObservationCache::new("acme");
        let snapshot = Arc::new(sample_snapshot());
        let meta = Meta {
            up: 1.0,
            timestamp: Some(snapshot.collected_at),
            ..Meta::default()
        };

        let first = cache.observations(&snapshot, &meta);
        let again = cache.observations(&snapshot, &meta);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first["nvidia_cls_entitlement_total_quantity"][0].value, 200.0);

        let stale = Meta { up: 0.0, ..meta };
        let rebuilt = cache.observations(&snapshot, &stale);
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt["nvidia_cls_up"][0].value, 0.0);

        let refreshed = Arc::new(sample_snapshot());
        let fresh = cache.observations(&refreshed, &stale);
        assert!(!Arc::ptr_eq(&rebuilt, &fresh));
        assert_eq!(fresh.len(), rebuilt.len());
    }
}
