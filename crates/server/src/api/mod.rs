pub mod nodes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the read-only status router.
pub fn router(state: AppState) -> Router {
    let max_concurrent = state.config.server.http_max_concurrent.max(1);
    Router::new()
        .route("/health", get(health))
        .route("/v1/nodes", get(nodes::list_nodes))
        .route("/v1/nodes/:id", get(nodes::get_node))
        .route("/v1/sessions", get(nodes::list_sessions))
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state)
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
