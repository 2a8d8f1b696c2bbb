//! CortexRelay proxy library
//!
//! The request pipeline of the tenant router: configuration, metrics, the
//! series classifier and batch partitioner, the concurrent upstream
//! dispatcher, and the ingress HTTP server.

pub mod config;
pub mod dispatch;
pub mod http;
pub mod metrics;
pub mod processor;
