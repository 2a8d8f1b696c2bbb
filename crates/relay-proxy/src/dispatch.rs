//! Concurrent upstream dispatch.
//!
//! One worker per tenant in the inbound batch, all sharing a single pooled
//! HTTP client. Each worker encodes its sub-batch, POSTs it to the backend
//! under the tenant identity header, and records the outcome into a result
//! slot assigned at launch. One attempt per call; the per-request timeout is
//! the only backpressure.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_relay_wire::proto::WriteRequest;
use cortex_relay_wire::{encode_write_request, WireError};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::Config;

/// Failures of a single upstream call. Upstream HTTP rejections are not
/// errors; they fold into the aggregated response instead.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unable to encode write request: {0}")]
    Encode(#[from] WireError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Response of a completed upstream call.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub code: u16,
    pub body: Vec<u8>,
    pub duration_seconds: f64,
}

/// Outcome of one per-tenant upstream call. `tenant` carries the effective
/// prefix already applied.
#[derive(Debug)]
pub struct UpstreamResult {
    pub tenant: String,
    pub outcome: Result<UpstreamResponse, DispatchError>,
}

/// The shared upstream HTTP client and its send/dispatch operations.
///
/// Cloning is cheap: the client is reference-counted and the pool is shared
/// across all clones.
#[derive(Clone)]
pub struct Upstream {
    cfg: Arc<Config>,
    client: reqwest::Client,
}

impl Upstream {
    /// Builds the pooled client from the connection policy in `cfg`.
    pub fn new(cfg: Arc<Config>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .connect_timeout(Duration::from_secs(1))
            .pool_max_idle_per_host(cfg.max_connections_per_host)
            .user_agent("cortex-relay");

        if let Some(max_age) = cfg.max_connection_duration {
            builder = builder.pool_idle_timeout(max_age);
        }

        if !cfg.ipv6 {
            // Pinning the local address to the v4 wildcard keeps the dialer
            // off AAAA records.
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        let client = builder.build()?;

        Ok(Self { cfg, client })
    }

    /// Sends one write request to the backend under `tenant`.
    pub async fn send(
        &self,
        client_addr: &str,
        req_id: Uuid,
        tenant: &str,
        req: &WriteRequest,
    ) -> UpstreamResult {
        UpstreamResult {
            tenant: tenant.to_string(),
            outcome: self.try_send(client_addr, req_id, tenant, req).await,
        }
    }

    async fn try_send(
        &self,
        client_addr: &str,
        req_id: Uuid,
        tenant: &str,
        req: &WriteRequest,
    ) -> Result<UpstreamResponse, DispatchError> {
        let start = Instant::now();
        let body = encode_write_request(req)?;

        let mut request = self
            .client
            .post(&self.cfg.backend.url)
            .header("Content-Encoding", "snappy")
            .header("Content-Type", "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0")
            .header("X-Cortex-Tenant-Client", client_addr)
            .header("X-Cortex-Tenant-ReqID", req_id.to_string())
            .header(self.cfg.tenant.header.as_str(), tenant)
            .body(body);

        let auth = &self.cfg.backend.auth;
        if !auth.username.is_empty() {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let code = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(UpstreamResponse {
            code,
            body,
            duration_seconds: start.elapsed().as_secs_f64(),
        })
    }

    /// Fans `batches` out to the backend, one concurrent worker per tenant.
    ///
    /// Result slots are assigned in launch order; aggregation downstream is
    /// order-insensitive either way. Returns after every worker finished.
    pub async fn dispatch(
        &self,
        client_addr: &str,
        req_id: Uuid,
        tenant_prefix: &str,
        batches: std::collections::HashMap<String, WriteRequest>,
    ) -> Vec<UpstreamResult> {
        let total = batches.len();
        let mut workers = JoinSet::new();

        for (slot, (tenant, req)) in batches.into_iter().enumerate() {
            let upstream = self.clone();
            let tenant = format!("{tenant_prefix}{tenant}");
            let client_addr = client_addr.to_string();

            workers.spawn(async move {
                (slot, upstream.send(&client_addr, req_id, &tenant, &req).await)
            });
        }

        let mut results: Vec<Option<UpstreamResult>> =
            std::iter::repeat_with(|| None).take(total).collect();

        while let Some(joined) = workers.join_next().await {
            if let Ok((slot, result)) = joined {
                results[slot] = Some(result);
            }
        }

        results.into_iter().flatten().collect()
    }
}
