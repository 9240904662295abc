//! Collection item routes.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use keysync_engine::KeyField;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::AppState;

/// Items added from outside any hub connection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalItems {
    pub key_field: KeyField,
    pub items: Vec<Value>,
}

/// Result of publishing external items.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Changes broadcast to the collection
    pub changes: usize,
}

/// Create item routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/collections/{collection}/items",
        get(snapshot_handler).post(publish_handler),
    )
}

/// POST /collections/{collection}/items - Upsert items and push them to
/// every connection of the collection.
async fn publish_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<ExternalItems>,
) -> Result<Json<PublishResponse>> {
    if request.key_field.path().is_empty() {
        return Err(AppError::BadRequest("keyField must not be empty".to_string()));
    }
    let changes = state
        .hub
        .publish_external(&collection, &request.key_field, request.items)
        .await?;
    Ok(Json(PublishResponse {
        changes: changes.len(),
    }))
}

/// GET /collections/{collection}/items - Authoritative snapshot.
async fn snapshot_handler(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Value>> {
    let snapshot = state.hub.snapshot(&collection, None).await?;
    Ok(Json(snapshot))
}
