//! Keysync Server - the hub keyed collections are mirrored from.
//!
//! Clients connect over WebSocket to `/hub/{collection}`, load the
//! authoritative snapshot, and send their edits as hub commands. Each command
//! is applied in one store transaction and the resulting change set is pushed
//! to every other client of the collection.

pub mod config;
pub mod error;
pub mod hub;
pub mod routes;
pub mod store;
pub mod websocket;

use crate::config::Config;
use crate::hub::Hub;
use crate::store::AuthoritativeStore;
use crate::websocket::ConnectionManager;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<Hub>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn AuthoritativeStore>) -> Self {
        let conn_manager = ConnectionManager::new_shared();
        Self {
            config: Arc::new(config),
            hub: Arc::new(Hub::new(store, conn_manager.clone())),
            conn_manager,
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
