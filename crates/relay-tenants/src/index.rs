//! Concurrent namespace-to-tenant index.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Mapping from namespace name to owning tenant.
///
/// Reads take a shared lock and are O(1); mutations take the exclusive lock
/// and apply in a single critical section, so a concurrent [`lookup`] sees
/// either the pre-write or the post-write state of one tenant, never a mix.
///
/// When two tenants claim the same namespace the last writer wins. That is a
/// misconfiguration to surface through monitoring, not something the index
/// resolves.
///
/// [`lookup`]: TenantIndex::lookup
#[derive(Debug, Default)]
pub struct TenantIndex {
    tenants: RwLock<HashMap<String, String>>,
}

impl TenantIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tenant owning `namespace`, if any.
    pub fn lookup(&self, namespace: &str) -> Option<String> {
        self.tenants.read().get(namespace).cloned()
    }

    /// Replaces the namespace set of `tenant` with `namespaces`.
    ///
    /// Entries of this tenant that are absent from the new list are removed;
    /// every listed namespace is (re)pointed at `tenant`, overwriting any
    /// previous owner.
    pub fn replace_tenant(&self, tenant: &str, namespaces: &[String]) {
        let current: HashSet<&str> = namespaces.iter().map(String::as_str).collect();

        let mut tenants = self.tenants.write();

        tenants.retain(|ns, t| t != tenant || current.contains(ns.as_str()));

        for ns in namespaces {
            tenants.insert(ns.clone(), tenant.to_string());
        }
    }

    /// Removes every namespace owned by `tenant`.
    pub fn delete_tenant(&self, tenant: &str) {
        self.tenants.write().retain(|_, t| t != tenant);
    }

    /// Number of mapped namespaces.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}
