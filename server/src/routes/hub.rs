//! Hub WebSocket endpoint.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::websocket::handle_hub_connection;
use crate::AppState;

/// Create hub routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/hub/{collection}", get(hub_upgrade))
}

/// GET /hub/{collection} - Upgrade to a hub connection bound to `collection`.
async fn hub_upgrade(
    ws: WebSocketUpgrade,
    Path(collection): Path<String>,
    State(state): State<AppState>,
) -> Response {
    tracing::debug!(collection = %collection, "Hub upgrade requested");
    ws.on_upgrade(move |socket| handle_hub_connection(socket, state.hub, collection))
}
