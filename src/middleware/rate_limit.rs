//! Coordinator RPC rate limiting middleware.
//!
//! The per-user coordinator is a single-writer actor (spec §5): every
//! mutating call serializes through one connection. A burst of calls to one
//! expensive operation (e.g. `recomputeProjections` over the whole store)
//! can starve every other caller waiting on the same lock. This limiter
//! gates by RPC operation name rather than by client IP, since the
//! resource being protected is the coordinator's single writer, not a
//! per-caller quota.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum calls per operation per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Burst allowance (extra calls above limit before hard reject).
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 100, window: Duration::from_secs(60), burst: 20 }
    }
}

/// Rate limiter state tracking calls per coordinator operation.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, state: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Check if a call to `operation` should be allowed.
    fn check(&self, operation: &str) -> RateLimitResult {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state
            .entry(operation.to_string())
            .or_insert(RateLimitEntry { count: 0, window_start: now });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        let limit = self.config.max_requests + self.config.burst;
        let remaining = limit.saturating_sub(entry.count);
        let reset_at = entry.window_start + self.config.window;

        if entry.count > limit {
            RateLimitResult::Exceeded { retry_after: reset_at.duration_since(now) }
        } else if entry.count > self.config.max_requests {
            RateLimitResult::BurstUsed { remaining }
        } else {
            RateLimitResult::Allowed { remaining }
        }
    }

    /// Periodic cleanup of old entries (call from a background task).
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;

        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

enum RateLimitResult {
    Allowed { remaining: u32 },
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

fn operation_name(path: &str) -> &str {
    path.strip_prefix("/rpc/").unwrap_or(path)
}

/// Rate limiting middleware function, keyed by `/rpc/<operation>` name.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let operation = operation_name(request.uri().path()).to_string();

    match limiter.check(&operation) {
        RateLimitResult::Allowed { .. } | RateLimitResult::BurstUsed { .. } => next.run(request).await,
        RateLimitResult::Exceeded { retry_after } => {
            warn!(
                operation = %operation,
                client_ip = %addr.ip(),
                retry_after_secs = retry_after.as_secs(),
                "coordinator operation rate limit exceeded"
            );

            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": format!("Too many calls to {operation}. Please slow down."),
                "retry_after_seconds": retry_after.as_secs(),
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}
