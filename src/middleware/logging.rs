//! Coordinator RPC logging middleware.
//!
//! Logs every `/rpc/<operation>` call with the operation name, status code,
//! and latency, so a slow or failing coordinator call shows up by name
//! instead of by raw HTTP path.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Span};

/// Pulls the operation name out of a `/rpc/<operation>` path. Falls back to
/// the full path for anything else (`/health`, unmatched routes).
fn operation_name(path: &str) -> &str {
    path.strip_prefix("/rpc/").unwrap_or(path)
}

/// Middleware that logs coordinator RPC calls with timing information.
///
/// Logs at INFO level for successful calls, WARN level for errors.
/// Includes: operation name, status code, latency in milliseconds.
pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let operation = operation_name(&path).to_string();

    // Skip logging for health checks to reduce noise
    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();

    // Create a span for this call
    let span = tracing::info_span!(
        "coordinator_rpc",
        operation = %operation,
        client_ip = %addr.ip(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let _guard = span.enter();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    // Record values in span
    Span::current().record("status", status);
    Span::current().record("latency_ms", latency.as_millis() as u64);

    if status >= 500 {
        warn!(
            method = %method,
            operation = %operation,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %addr.ip(),
            "coordinator call failed (5xx)"
        );
    } else if status >= 400 {
        info!(
            method = %method,
            operation = %operation,
            status = status,
            latency_ms = latency.as_millis(),
            client_ip = %addr.ip(),
            "coordinator call rejected (4xx)"
        );
    } else {
        info!(
            method = %method,
            operation = %operation,
            status = status,
            latency_ms = latency.as_millis(),
            "coordinator call completed"
        );
    }

    response
}

/// Simplified logging middleware without client address (for use without ConnectInfo).
pub async fn request_logging_simple(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_string();
    let operation = operation_name(&path).to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            method = %method,
            operation = %operation,
            status = status,
            latency_ms = latency.as_millis(),
            "coordinator call failed (5xx)"
        );
    } else {
        info!(
            method = %method,
            operation = %operation,
            status = status,
            latency_ms = latency.as_millis(),
            "coordinator call completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_name_strips_rpc_prefix() {
        assert_eq!(operation_name("/rpc/upsertCanonicalEvent"), "upsertCanonicalEvent");
    }

    #[test]
    fn operation_name_falls_back_for_non_rpc_paths() {
        assert_eq!(operation_name("/health"), "/health");
    }
}
