//! Series classification and batch partitioning.
//!
//! Every inbound time series is mapped to a tenant by scanning its labels
//! for the configured tenant label names, resolving the matched value
//! through the tenant index, and falling back to the configured default.
//! A batch is then split into one `WriteRequest` per tenant before fan-out.

use std::collections::HashMap;

use cortex_relay_tenants::TenantIndex;
use cortex_relay_wire::proto::{TimeSeries, WriteRequest};

use crate::config::TenantConfig;
use crate::metrics;

/// Classification failures; they reject the whole inbound batch with 400.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("label(s): {{'{labels}'}} not found")]
    MissingLabel { labels: String },
}

/// Determines the tenant for one series and applies label removal.
///
/// The first series label (in series order) whose name appears in
/// `cfg.labels` wins; later matches are ignored. Its value is resolved
/// through the index, with `cfg.default` as the fallback. When
/// `cfg.label_remove` is set and a label matched, the label is removed
/// in place preserving the order of the remaining labels — downstream
/// deduplication depends on label order.
pub fn classify_series(
    ts: &mut TimeSeries,
    cfg: &TenantConfig,
    index: &TenantIndex,
) -> Result<String, ClassifyError> {
    let matched = ts
        .labels
        .iter()
        .enumerate()
        .find(|(_, label)| cfg.labels.iter().any(|name| *name == label.name))
        .map(|(idx, label)| (idx, label.value.clone()));

    let tenant = match matched
        .as_ref()
        .and_then(|(_, namespace)| index.lookup(namespace))
    {
        Some(tenant) => tenant,
        None => {
            if cfg.default.is_empty() {
                return Err(ClassifyError::MissingLabel {
                    labels: cfg.labels.join("','"),
                });
            }

            cfg.default.clone()
        }
    };

    if cfg.label_remove {
        if let Some((idx, _)) = matched {
            // Ordered removal, not swap-remove.
            ts.labels.remove(idx);
        }
    }

    Ok(tenant)
}

/// Splits an inbound batch into per-tenant write requests.
///
/// Series order within each tenant follows the inbound order; no series is
/// lost or duplicated. Any classification failure aborts the whole batch.
pub fn partition_write_request(
    req: WriteRequest,
    cfg: &TenantConfig,
    index: &TenantIndex,
) -> Result<HashMap<String, WriteRequest>, ClassifyError> {
    let mut batches: HashMap<String, WriteRequest> = HashMap::new();

    for mut ts in req.timeseries {
        let tenant = classify_series(&mut ts, cfg, index)?;

        metrics::TIMESERIES_RECEIVED_TOTAL
            .with_label_values(&[&tenant])
            .inc();
        metrics::TIMESERIES_RECEIVED_TOTAL.with_label_values(&[""]).inc();

        batches.entry(tenant).or_default().timeseries.push(ts);
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use cortex_relay_wire::proto::{Label, Sample};

    use super::*;

    fn tenant_cfg(labels: &[&str], default: &str, label_remove: bool) -> TenantConfig {
        TenantConfig {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            default: default.to_string(),
            label_remove,
            ..TenantConfig::default()
        }
    }

    fn series(labels: &[(&str, &str)]) -> TimeSeries {
        TimeSeries {
            labels: labels.iter().map(|(n, v)| Label::new(*n, *v)).collect(),
            samples: vec![Sample {
                value: 1.0,
                timestamp: 1_700_000_000_000,
            }],
        }
    }

    fn index_with(entries: &[(&str, &[&str])]) -> TenantIndex {
        let index = TenantIndex::new();
        for (tenant, namespaces) in entries {
            let namespaces: Vec<String> = namespaces.iter().map(|n| n.to_string()).collect();
            index.replace_tenant(tenant, &namespaces);
        }
        index
    }

    #[test]
    fn unmatched_series_falls_back_to_default() {
        let cfg = tenant_cfg(&["namespace"], "default", false);
        let index = TenantIndex::new();
        let mut ts = series(&[("job", "test"), ("instance", "localhost:9090")]);

        let tenant = classify_series(&mut ts, &cfg, &index).unwrap();

        assert_eq!(tenant, "default");
        assert_eq!(ts.labels.len(), 2);
    }

    #[test]
    fn indexed_namespace_resolves_to_tenant() {
        let cfg = tenant_cfg(&["namespace"], "default", false);
        let index = index_with(&[("solar", &["solar-one", "solar-two", "solar-three"])]);
        let mut ts = series(&[("namespace", "solar-three"), ("job", "test")]);

        assert_eq!(classify_series(&mut ts, &cfg, &index).unwrap(), "solar");
    }

    #[test]
    fn alternative_label_names_are_searched() {
        let cfg = tenant_cfg(&["namespace", "target_namespace"], "default", false);
        let index = index_with(&[("oil", &["oil-one"])]);
        let mut ts = series(&[("job", "test"), ("target_namespace", "oil-one")]);

        assert_eq!(classify_series(&mut ts, &cfg, &index).unwrap(), "oil");
    }

    #[test]
    fn unknown_namespace_falls_back_to_default() {
        let cfg = tenant_cfg(&["namespace", "target_namespace"], "default", false);
        let index = index_with(&[("oil", &["oil-one"])]);
        let mut ts = series(&[("target_namespace", "oil-prod")]);

        assert_eq!(classify_series(&mut ts, &cfg, &index).unwrap(), "default");
    }

    #[test]
    fn missing_default_rejects_the_series() {
        let cfg = tenant_cfg(&["namespace", "target_namespace"], "", false);
        let index = TenantIndex::new();
        let mut ts = series(&[("job", "test")]);

        let err = classify_series(&mut ts, &cfg, &index).unwrap_err();

        assert_eq!(
            err.to_string(),
            "label(s): {'namespace','target_namespace'} not found"
        );
    }

    #[test]
    fn first_series_label_match_wins() {
        // Both labels are configured; the one appearing first in the series
        // decides, regardless of config order.
        let cfg = tenant_cfg(&["namespace", "target_namespace"], "default", false);
        let index = index_with(&[("solar", &["solar-one"]), ("oil", &["oil-one"])]);
        let mut ts = series(&[("target_namespace", "oil-one"), ("namespace", "solar-one")]);

        assert_eq!(classify_series(&mut ts, &cfg, &index).unwrap(), "oil");
    }

    #[test]
    fn label_removal_preserves_order() {
        let cfg = tenant_cfg(&["__tenant__"], "default", true);
        let index = TenantIndex::new();
        let mut ts = series(&[("a", "1"), ("__tenant__", "foo"), ("b", "2"), ("c", "3")]);

        classify_series(&mut ts, &cfg, &index).unwrap();

        let names: Vec<&str> = ts.labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn label_removal_applies_on_index_hit_too() {
        let cfg = tenant_cfg(&["namespace"], "default", true);
        let index = index_with(&[("solar", &["solar-one"])]);
        let mut ts = series(&[("job", "test"), ("namespace", "solar-one"), ("zone", "a")]);

        assert_eq!(classify_series(&mut ts, &cfg, &index).unwrap(), "solar");

        let names: Vec<&str> = ts.labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["job", "zone"]);
    }

    #[test]
    fn partition_keeps_every_series_exactly_once() {
        let cfg = tenant_cfg(&["namespace"], "default", false);
        let index = index_with(&[("solar", &["solar-one"]), ("oil", &["oil-one"])]);

        let req = WriteRequest {
            timeseries: vec![
                series(&[("namespace", "solar-one"), ("n", "0")]),
                series(&[("namespace", "oil-one"), ("n", "1")]),
                series(&[("n", "2")]),
                series(&[("namespace", "solar-one"), ("n", "3")]),
            ],
            metadata: vec![],
        };

        let batches = partition_write_request(req, &cfg, &index).unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(batches["solar"].timeseries.len(), 2);
        assert_eq!(batches["oil"].timeseries.len(), 1);
        assert_eq!(batches["default"].timeseries.len(), 1);

        let total: usize = batches.values().map(|b| b.timeseries.len()).sum();
        assert_eq!(total, 4);

        // Inbound order survives within a tenant.
        let ns: Vec<&str> = batches["solar"]
            .timeseries
            .iter()
            .map(|ts| ts.labels.iter().find(|l| l.name == "n").unwrap().value.as_str())
            .collect();
        assert_eq!(ns, vec!["0", "3"]);
    }

    #[test]
    fn partition_fails_fast_on_classification_error() {
        let cfg = tenant_cfg(&["namespace"], "", false);
        let index = TenantIndex::new();

        let req = WriteRequest {
            timeseries: vec![
                series(&[("namespace", "unknown")]),
                series(&[("job", "test")]),
            ],
            metadata: vec![],
        };

        assert!(partition_write_request(req, &cfg, &index).is_err());
    }
}
