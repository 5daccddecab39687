//! API Router configuration

use super::calls_handler::{get_permission, hangup_outgoing_call, make_outgoing_call, send_permission_request};
use super::metrics_handler::metrics_handler;
use super::monitoring::health_check;
use super::state::AppState;
use super::transfer_handler::{
    accept_transfer, end_transfer, list_transfers, pick_next, resume_transfer, return_to_queue,
};
use super::websocket::ws_handler;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    let call_routes = Router::new()
        .route("/api/calls/outgoing", post(make_outgoing_call))
        .route("/api/calls/outgoing/:id/hangup", post(hangup_outgoing_call))
        .route("/api/calls/permission-request", post(send_permission_request))
        .route("/api/calls/permissions/:contact_id", get(get_permission));

    let transfer_routes = Router::new()
        .route("/api/calls/transfers", get(list_transfers))
        .route("/api/calls/transfers/pick", post(pick_next))
        .route("/api/calls/transfers/return", post(return_to_queue))
        .route("/api/calls/transfers/:id/accept", post(accept_transfer))
        .route("/api/calls/transfers/:id/end", post(end_transfer))
        .route("/api/calls/transfers/:id/resume", post(resume_transfer));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    // WebSocket route (separate state)
    let ws_routes = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state.manager.events().clone());

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .merge(transfer_routes)
        .with_state(state)
        .merge(metrics_routes)
        .merge(ws_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
