//! Event-driven reconciliation of the tenant index.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::index::TenantIndex;
use crate::source::{SourceError, TenantEvent, TenantSource};

/// Applies tenant catalog events to a shared [`TenantIndex`].
///
/// The reconciler is the single writer of the index; the request path holds
/// shared read access.
pub struct Reconciler {
    index: Arc<TenantIndex>,
}

impl Reconciler {
    pub fn new(index: Arc<TenantIndex>) -> Self {
        Self { index }
    }

    /// Loads every tenant from `source` into the index.
    ///
    /// Must complete before the ingress server accepts traffic, otherwise
    /// every series would classify to the fallback tenant. A listing failure
    /// here aborts startup.
    pub async fn bootstrap<S: TenantSource>(&self, source: &S) -> Result<usize, SourceError> {
        let specs = source.list().await?;
        let count = specs.len();

        for spec in specs {
            self.index.replace_tenant(&spec.name, &spec.namespaces);
        }

        info!(
            tenants = count,
            namespaces = self.index.len(),
            "tenant index bootstrapped"
        );

        Ok(count)
    }

    /// Consumes catalog events until the channel closes.
    pub async fn run(self, mut rx: mpsc::Receiver<TenantEvent>) {
        while let Some(event) = rx.recv().await {
            self.apply(event);
        }

        debug!("tenant event stream closed, reconciler stopping");
    }

    fn apply(&self, event: TenantEvent) {
        match event {
            TenantEvent::Applied(spec) => {
                debug!(tenant = %spec.name, namespaces = spec.namespaces.len(), "tenant applied");
                self.index.replace_tenant(&spec.name, &spec.namespaces);
            }
            TenantEvent::Deleted(name) => {
                info!(tenant = %name, "tenant deleted");
                self.index.delete_tenant(&name);
            }
        }
    }
}
