//! HTTP route definitions.

mod health;
mod hub;
mod items;

use crate::AppState;
use axum::Router;

pub use health::HealthResponse;
pub use items::{ExternalItems, PublishResponse};

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(hub::routes())
        .merge(items::routes())
}
