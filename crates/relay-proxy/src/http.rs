//! Ingress HTTP server.
//!
//! Route table:
//!
//! | Path     | Method | Behavior                                  |
//! |----------|--------|-------------------------------------------|
//! | `/alive` | any    | 200, or 503 while draining                |
//! | `/push`  | POST   | Remote Write pipeline                     |
//! | `/push`  | other  | 400 "Expecting POST"                      |
//! | other    | any    | 404                                       |

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use cortex_relay_tenants::TenantIndex;
use cortex_relay_wire::decode_write_request;
use cortex_relay_wire::proto::WriteRequest;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{Config, TenantConfig};
use crate::dispatch::{Upstream, UpstreamResult};
use crate::metrics;
use crate::processor::partition_write_request;

/// Inbound bodies beyond this are rejected.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state of the ingress handlers.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub index: Arc<TenantIndex>,
    pub upstream: Upstream,
    /// Set once on shutdown; flips `/alive` to 503 so load balancers drain
    /// this instance.
    pub draining: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, index: Arc<TenantIndex>) -> Result<Self, reqwest::Error> {
        let upstream = Upstream::new(Arc::clone(&cfg))?;

        Ok(Self {
            cfg,
            index,
            upstream,
            draining: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Builds the ingress router.
pub fn app(state: AppState) -> Router {
    let timeout = state.cfg.timeout;
    let concurrency = state.cfg.concurrency;

    Router::new()
        .route("/alive", any(alive))
        .route("/push", any(push))
        .fallback(unknown_url)
        .layer(TraceLayer::new_for_http())
        .layer(GlobalConcurrencyLimitLayer::new(concurrency))
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

async fn alive(State(state): State<AppState>) -> StatusCode {
    if state.draining.load(Ordering::Acquire) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn unknown_url() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Unknown URL")
}

async fn push(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::POST {
        return (StatusCode::BAD_REQUEST, "Expecting POST").into_response();
    }

    let client_addr = client_addr(&request);
    let source_tenant = request
        .headers()
        .get(state.cfg.tenant.header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("unable to read body: {err}"))
                .into_response()
        }
    };

    metrics::TIMESERIES_BATCHES_RECEIVED_TOTAL.inc();
    metrics::TIMESERIES_BATCHES_RECEIVED_BYTES.observe(body.len() as f64);

    let inbound = match decode_write_request(&body) {
        Ok(req) => req,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let tenant_prefix = effective_prefix(&state.cfg.tenant, &source_tenant);
    let req_id = Uuid::new_v4();

    if inbound.timeseries.is_empty() {
        return metadata_only(&state, &client_addr, req_id, &tenant_prefix, inbound).await;
    }

    let batches = match partition_write_request(inbound, &state.cfg.tenant, &state.index) {
        Ok(batches) => batches,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let results = state
        .upstream
        .dispatch(&client_addr, req_id, &tenant_prefix, batches)
        .await;

    if state.cfg.tenant.accept_all {
        return StatusCode::NO_CONTENT.into_response();
    }

    let (code, body) = aggregate_results(
        results,
        &client_addr,
        req_id,
        state.cfg.tenant.per_tenant_durations,
    );

    (code, body).into_response()
}

/// Handles a batch with no series: forward metadata when configured,
/// otherwise acknowledge and drop.
async fn metadata_only(
    state: &AppState,
    client_addr: &str,
    req_id: Uuid,
    tenant_prefix: &str,
    inbound: WriteRequest,
) -> Response {
    if inbound.metadata.is_empty() {
        return (StatusCode::BAD_REQUEST, "No timeseries found in the request").into_response();
    }

    if state.cfg.metadata && !state.cfg.tenant.default.is_empty() {
        let tenant = format!("{tenant_prefix}{}", state.cfg.tenant.default);
        let result = state
            .upstream
            .send(client_addr, req_id, &tenant, &inbound)
            .await;

        return match result.outcome {
            Ok(resp) => (status_from(resp.code), resp.body).into_response(),
            Err(err) => {
                error!(
                    source = client_addr,
                    req_id = %req_id,
                    error = %err,
                    "unable to proxy metadata"
                );

                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        };
    }

    StatusCode::OK.into_response()
}

/// Folds the per-tenant results into one response: the numerically largest
/// upstream status wins (ties go to the later result); any transport error
/// turns the whole batch into a 500 carrying the joined error messages.
fn aggregate_results(
    results: Vec<UpstreamResult>,
    client_addr: &str,
    req_id: Uuid,
    per_tenant_durations: bool,
) -> (StatusCode, Vec<u8>) {
    let mut errors: Vec<String> = Vec::new();
    let mut chosen: Option<(u16, Vec<u8>)> = None;

    for result in results {
        metrics::TIMESERIES_REQUESTS_TOTAL
            .with_label_values(&[&result.tenant])
            .inc();

        let resp = match result.outcome {
            Ok(resp) => resp,
            Err(err) => {
                metrics::TIMESERIES_REQUEST_ERRORS_TOTAL
                    .with_label_values(&[&result.tenant])
                    .inc();
                error!(
                    source = client_addr,
                    req_id = %req_id,
                    tenant = %result.tenant,
                    error = %err,
                    "upstream request failed"
                );
                errors.push(err.to_string());

                continue;
            }
        };

        if !(200..300).contains(&resp.code) {
            info!(
                source = client_addr,
                req_id = %req_id,
                tenant = %result.tenant,
                code = resp.code,
                body = %String::from_utf8_lossy(&resp.body),
                "upstream HTTP code not 2xx"
            );
        }

        let duration_tenant = if per_tenant_durations {
            result.tenant.as_str()
        } else {
            ""
        };
        metrics::TIMESERIES_REQUEST_DURATION_SECONDS
            .with_label_values(&[&resp.code.to_string(), duration_tenant])
            .observe(resp.duration_seconds);

        if chosen.as_ref().is_none_or(|(code, _)| resp.code >= *code) {
            chosen = Some((resp.code, resp.body));
        }
    }

    if !errors.is_empty() {
        return (StatusCode::INTERNAL_SERVER_ERROR, errors.join("; ").into_bytes());
    }

    let (code, body) = chosen.unwrap_or((200, b"Ok".to_vec()));

    (status_from(code), body)
}

fn status_from(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// The tenant prefix applied on this request: the configured static prefix,
/// or the inbound tenant header plus `-` when `prefixPreferSource` is set.
fn effective_prefix(cfg: &TenantConfig, source_tenant: &str) -> String {
    if cfg.prefix_prefer_source && !source_tenant.is_empty() {
        return format!("{source_tenant}-");
    }

    cfg.prefix.clone()
}

/// Best-effort client address: proxy headers first, then the connection.
fn client_addr(request: &Request<Body>) -> String {
    for header in ["x-forwarded-for", "x-real-ip"] {
        let first = request
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(addr) = first {
            return addr.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use crate::dispatch::{DispatchError, UpstreamResponse};

    use super::*;

    fn ok_result(tenant: &str, code: u16, body: &str) -> UpstreamResult {
        UpstreamResult {
            tenant: tenant.to_string(),
            outcome: Ok(UpstreamResponse {
                code,
                body: body.as_bytes().to_vec(),
                duration_seconds: 0.01,
            }),
        }
    }

    fn err_result(tenant: &str) -> UpstreamResult {
        let wire_err = decode_write_request(b"\xff\xffgarbage").unwrap_err();

        UpstreamResult {
            tenant: tenant.to_string(),
            outcome: Err(DispatchError::Encode(wire_err)),
        }
    }

    #[test]
    fn max_status_code_wins() {
        let (code, body) = aggregate_results(
            vec![
                ok_result("test-a", 200, "a"),
                ok_result("test-b", 500, "b"),
                ok_result("test-c", 429, "c"),
            ],
            "127.0.0.1",
            Uuid::new_v4(),
            false,
        );

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, b"b");
    }

    #[test]
    fn equal_codes_keep_the_later_result() {
        let (code, body) = aggregate_results(
            vec![ok_result("test-a", 200, "a"), ok_result("test-b", 200, "b")],
            "127.0.0.1",
            Uuid::new_v4(),
            false,
        );

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, b"b");
    }

    #[test]
    fn transport_error_turns_into_500() {
        let (code, body) = aggregate_results(
            vec![ok_result("test-a", 200, "a"), err_result("test-b")],
            "127.0.0.1",
            Uuid::new_v4(),
            false,
        );

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8(body).unwrap().contains("Snappy"));
    }

    #[test]
    fn multiple_errors_are_joined() {
        let (code, body) = aggregate_results(
            vec![err_result("test-a"), err_result("test-b")],
            "127.0.0.1",
            Uuid::new_v4(),
            false,
        );

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8(body).unwrap().contains("; "));
    }

    #[test]
    fn prefix_prefers_source_when_configured() {
        let mut cfg = TenantConfig {
            prefix: "static-".to_string(),
            ..TenantConfig::default()
        };

        assert_eq!(effective_prefix(&cfg, "team"), "static-");

        cfg.prefix_prefer_source = true;
        assert_eq!(effective_prefix(&cfg, "team"), "team-");
        assert_eq!(effective_prefix(&cfg, ""), "static-");
    }
}
