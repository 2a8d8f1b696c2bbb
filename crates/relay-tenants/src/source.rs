//! Tenant catalog sources and the watch event contract.
//!
//! The reconciler is transport-agnostic: anything able to produce an initial
//! listing and a stream of [`TenantEvent`]s can drive it. The source shipped
//! here is a polled file catalog; a cluster watcher can feed the same
//! channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One tenant as seen in the catalog: its name and its member namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TenantSpec {
    pub name: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

/// A change observed in the tenant catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantEvent {
    /// The tenant was created or its namespace list changed.
    Applied(TenantSpec),
    /// The tenant no longer exists.
    Deleted(String),
}

/// Errors raised while reading a tenant catalog.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("unable to read tenant catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse tenant catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// An authoritative listing of all tenants, used for the bulk init before
/// the server accepts traffic.
pub trait TenantSource {
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<TenantSpec>, SourceError>> + Send;
}

/// Tenant catalog backed by a YAML file, polled on an interval.
///
/// The file holds a list of tenants:
///
/// ```yaml
/// - name: solar
///   namespaces: [solar-one, solar-two]
/// - name: oil
///   namespaces: [oil-one]
/// ```
///
/// [`watch`] diffs successive snapshots into events; a tenant that vanishes
/// from the file becomes a [`TenantEvent::Deleted`]. Poll failures are
/// logged and retried on the next tick.
///
/// [`watch`]: FileTenantSource::watch
#[derive(Debug, Clone)]
pub struct FileTenantSource {
    path: PathBuf,
}

impl FileTenantSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Polls the catalog file every `interval`, emitting change events until
    /// the receiving side goes away.
    pub async fn watch(self, tx: mpsc::Sender<TenantEvent>, interval: Duration) {
        let mut known: HashMap<String, TenantSpec> = HashMap::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The first tick completes immediately and seeds the snapshot.
        loop {
            ticker.tick().await;

            let specs = match self.list().await {
                Ok(specs) => specs,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "tenant catalog poll failed");
                    continue;
                }
            };

            for event in diff_snapshots(&known, &specs) {
                debug!(?event, "tenant catalog change");
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            known = specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        }
    }
}

impl TenantSource for FileTenantSource {
    async fn list(&self) -> Result<Vec<TenantSpec>, SourceError> {
        let raw = tokio::fs::read(&self.path).await?;
        let specs: Vec<TenantSpec> = serde_yaml::from_slice(&raw)?;

        Ok(specs)
    }
}

/// Computes the events turning the `known` snapshot into `current`.
fn diff_snapshots(
    known: &HashMap<String, TenantSpec>,
    current: &[TenantSpec],
) -> Vec<TenantEvent> {
    let mut events = Vec::new();

    for spec in current {
        if known.get(&spec.name) != Some(spec) {
            events.push(TenantEvent::Applied(spec.clone()));
        }
    }

    for name in known.keys() {
        if !current.iter().any(|s| &s.name == name) {
            events.push(TenantEvent::Deleted(name.clone()));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn spec(name: &str, namespaces: &[&str]) -> TenantSpec {
        TenantSpec {
            name: name.to_string(),
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn snapshot(specs: &[TenantSpec]) -> HashMap<String, TenantSpec> {
        specs.iter().map(|s| (s.name.clone(), s.clone())).collect()
    }

    #[test]
    fn diff_reports_new_changed_and_deleted() {
        let known = snapshot(&[spec("solar", &["solar-one"]), spec("oil", &["oil-one"])]);
        let current = vec![
            spec("solar", &["solar-one", "solar-two"]),
            spec("gas", &["gas-one"]),
        ];

        let events = diff_snapshots(&known, &current);

        assert!(events.contains(&TenantEvent::Applied(spec(
            "solar",
            &["solar-one", "solar-two"]
        ))));
        assert!(events.contains(&TenantEvent::Applied(spec("gas", &["gas-one"]))));
        assert!(events.contains(&TenantEvent::Deleted("oil".to_string())));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn diff_is_empty_for_identical_snapshots() {
        let specs = vec![spec("solar", &["solar-one"])];
        let known = snapshot(&specs);

        assert!(diff_snapshots(&known, &specs).is_empty());
    }

    #[tokio::test]
    async fn file_source_lists_tenants() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- name: solar\n  namespaces: [solar-one, solar-two]\n- name: oil\n  namespaces: [oil-one]"
        )
        .unwrap();

        let source = FileTenantSource::new(file.path());
        let specs = source.list().await.unwrap();

        assert_eq!(
            specs,
            vec![
                spec("solar", &["solar-one", "solar-two"]),
                spec("oil", &["oil-one"]),
            ]
        );
    }

    #[tokio::test]
    async fn file_source_surfaces_io_and_parse_errors() {
        let missing = FileTenantSource::new("/nonexistent/tenants.yml");
        assert!(matches!(
            missing.list().await.unwrap_err(),
            SourceError::Io(_)
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not: [valid, tenant, catalog").unwrap();

        let source = FileTenantSource::new(file.path());
        assert!(matches!(
            source.list().await.unwrap_err(),
            SourceError::Parse(_)
        ));
    }
}
