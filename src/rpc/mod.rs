//! HTTP JSON surface over the coordinator (spec §6.3).
//!
//! One `/rpc/<operation>` route per coordinator operation. All state lives
//! in the coordinator; this module only does request/response plumbing and
//! status-code mapping.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::Error;
use crate::middleware::rate_limit::{RateLimitConfig as HttpRateLimitConfig, RateLimitLayer};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

/// Maps the coordinator's internal error taxonomy onto the status codes
/// spec §6.3/§7 call for: validation -> 400, not found -> 404, everything
/// else -> 500 with the message redacted.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.redacted_message() }));
        (status, body).into_response()
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub fn build_router(coordinator: Arc<Coordinator>, config: &Config) -> Router {
    let state = AppState { coordinator };

    let rpc_routes = Router::new()
        .route("/rpc/applyProviderDelta", post(routes::apply_provider_delta))
        .route("/rpc/upsertCanonicalEvent", post(routes::upsert_canonical_event))
        .route("/rpc/deleteCanonicalEvent", post(routes::delete_canonical_event))
        .route("/rpc/listCanonicalEvents", post(routes::list_canonical_events))
        .route("/rpc/getCanonicalEvent", post(routes::get_canonical_event))
        .route("/rpc/findCanonicalByOrigin", post(routes::find_canonical_by_origin))
        .route("/rpc/queryJournal", post(routes::query_journal))
        .route("/rpc/logReconcileDiscrepancy", post(routes::log_reconcile_discrepancy))
        .route("/rpc/recomputeProjections", post(routes::recompute_projections))
        .route("/rpc/computeAvailability", post(routes::compute_availability))
        .route("/rpc/getSyncHealth", get(routes::get_sync_health))
        .route("/rpc/getActiveMirrors", get(routes::get_active_mirrors))
        .route("/rpc/createPolicy", post(routes::create_policy))
        .route("/rpc/listPolicies", get(routes::list_policies))
        .route("/rpc/getPolicy", post(routes::get_policy))
        .route("/rpc/getPolicyEdges", post(routes::get_policy_edges))
        .route("/rpc/setPolicyEdges", post(routes::set_policy_edges))
        .route("/rpc/ensureDefaultPolicy", post(routes::ensure_default_policy))
        .route("/rpc/unlinkAccount", post(routes::unlink_account))
        .route("/rpc/addConstraint", post(routes::add_constraint))
        .route("/rpc/deleteConstraint", post(routes::delete_constraint))
        .route("/rpc/listConstraints", post(routes::list_constraints))
        .route("/rpc/getConstraint", post(routes::get_constraint))
        .with_state(state);

    let rate_limiter = RateLimitLayer::new(HttpRateLimitConfig {
        max_requests: config.rate_limit.max_requests,
        window: Duration::from_secs(config.rate_limit.window_secs),
        burst: config.rate_limit.burst,
    });

    Router::new()
        .route("/health", get(health_check))
        .merge(rpc_routes)
        .layer(axum::middleware::from_fn_with_state(rate_limiter, crate::middleware::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(crate::middleware::logging::request_logging_simple))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(coordinator: Arc<Coordinator>, config: &Config) -> anyhow::Result<()> {
    let app = build_router(coordinator, config);
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "rpc surface listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
