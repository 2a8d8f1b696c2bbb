//! CortexRelay tenant mapping
//!
//! A concurrent `namespace -> tenant` index, the reconciler that keeps it in
//! sync with an authoritative tenant catalog, and the event contract between
//! the two. The index is consulted on every incoming time series by the
//! request path; the reconciler is the only writer.

pub mod index;
pub mod reconciler;
pub mod source;

pub use index::TenantIndex;
pub use reconciler::Reconciler;
pub use source::{FileTenantSource, SourceError, TenantEvent, TenantSource, TenantSpec};
