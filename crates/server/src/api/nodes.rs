//! Status endpoints backed by the last published snapshot.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use super::api_error;
use crate::state::AppState;

/// GET /v1/nodes: every configured node, in configuration order.
pub async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.snapshots.latest();
    Json(serde_json::json!({
        "cause": snap.cause,
        "updated_at": snap.updated_at,
        "count": snap.nodes.len(),
        "online": snap.online_count(),
        "nodes": snap.nodes,
    }))
}

/// GET /v1/nodes/:id
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let snap = state.snapshots.latest();
    match snap.node(&id) {
        Some(node) => Json(node).into_response(),
        None => api_error(StatusCode::NOT_FOUND, format!("node {id:?} not found")),
    }
}

/// GET /v1/sessions: live agent connections.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.collector.sessions().list();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}
