//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers and any client
//! credential, injects configured headers, and forwards through the
//! dispatcher. The dispatcher signs the request and hides credential refresh;
//! whatever it returns is mapped back onto an HTTP response.

use crate::config::HeaderInjection;
use crate::metrics;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use dispatch::{DispatchError, Dispatcher};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, instrument, warn};
use transport::TransportError;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Upper bound on buffered request bodies.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the proxy handler
#[derive(Clone)]
pub struct ProxyState {
    pub dispatcher: Dispatcher,
    pub upstream_url: String,
    pub headers_to_inject: Vec<HeaderInjection>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl ProxyState {
    fn record_error(&self, error_type: &str) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_upstream_error(error_type);
    }
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Proxy an inbound request to upstream through the dispatcher.
#[instrument(
    skip_all,
    fields(request_id = %request_id, method = %request.method(), path = %request.uri().path())
)]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let method = request.method().clone();
    let uri = request.uri().clone();

    let upstream_url = if let Some(pq) = uri.path_and_query() {
        format!("{}{}", state.upstream_url.trim_end_matches('/'), pq)
    } else {
        state.upstream_url.clone()
    };

    // The dispatcher owns the upstream credential; the upstream host comes
    // from the URL.
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str())
            && name != axum::http::header::AUTHORIZATION
            && name != axum::http::header::HOST
        {
            headers.append(name.clone(), value.clone());
        }
    }
    inject_headers(&mut headers, &state.headers_to_inject);

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            let response = error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                &request_id,
            );
            metrics::record_request(400, method.as_str(), started.elapsed().as_secs_f64());
            return response;
        }
    };

    let mut outbound = transport::Request::new(method.clone(), upstream_url).with_body(body);
    outbound.headers = headers;

    let response = match state.dispatcher.perform(outbound).await {
        Ok(upstream) => upstream_response(upstream, &request_id),
        Err(DispatchError::Unauthorized(upstream)) => {
            // Still rejected after a fresh credential: hand the upstream's
            // answer back as-is.
            warn!(status = upstream.status, "upstream rejected refreshed credential");
            state.record_error("unauthorized");
            upstream_response(upstream, &request_id)
        }
        Err(DispatchError::AuthorizationDenied(reason)) => {
            error!(error = %reason, "re-authorization failed");
            state.record_error("authorization_denied");
            error_response(
                StatusCode::BAD_GATEWAY,
                "authorization_denied",
                &format!("upstream re-authorization failed: {reason}"),
                &request_id,
            )
        }
        Err(DispatchError::Transport(TransportError::Timeout(msg))) => {
            error!(error = %msg, "upstream timeout");
            state.record_error("timeout");
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "upstream_timeout",
                &format!("upstream timeout: {msg}"),
                &request_id,
            )
        }
        Err(DispatchError::Transport(e)) => {
            error!(error = %e, "upstream request failed");
            state.record_error("connection");
            error_response(
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                &format!("upstream error: {e}"),
                &request_id,
            )
        }
        Err(e @ (DispatchError::Signing(_) | DispatchError::Abandoned)) => {
            error!(error = %e, "request could not be dispatched");
            state.record_error("internal");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &e.to_string(),
                &request_id,
            )
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Insert configured headers (replacing existing values). Authorization is
/// never injected: it belongs to the dispatcher's signer.
fn inject_headers(headers: &mut reqwest::header::HeaderMap, injections: &[HeaderInjection]) {
    for injection in injections {
        let name = match HeaderName::from_str(&injection.name) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        if name == axum::http::header::AUTHORIZATION {
            warn!(header = %injection.name, "refusing to inject authorization header");
            continue;
        }
        let value = match HeaderValue::from_str(&injection.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %injection.name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }
}

/// Convert the upstream response, dropping hop-by-hop headers.
fn upstream_response(upstream: transport::Response, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
