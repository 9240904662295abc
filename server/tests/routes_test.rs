//! HTTP routes exercised through the router, without a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use keysync_server::config::Config;
use keysync_server::routes::{HealthResponse, PublishResponse};
use keysync_server::store::MemoryStore;
use keysync_server::{app, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn state() -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (AppState::new(Config::in_memory(0), store.clone()), store)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_items(collection: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/collections/{collection}/items"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_version_and_connections() {
    let (state, _) = state();
    let response = app(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.connections, 0);
}

#[tokio::test]
async fn posted_items_are_stored_and_listed() {
    let (state, store) = state();
    let router = app(state);

    let response = router
        .clone()
        .oneshot(post_items(
            "people",
            json!({"keyField": "id", "items": [{"id": "a", "age": 1}, {"id": "b", "age": 2}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let published: PublishResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(published.changes, 2);
    assert_eq!(store.commit_count(), 1);

    let response = router
        .oneshot(
            Request::get("/collections/people/items")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await,
        json!({"a": {"id": "a", "age": 1}, "b": {"id": "b", "age": 2}})
    );
}

#[tokio::test]
async fn items_without_key_are_rejected() {
    let (state, store) = state();
    let router = app(state);

    let response = router
        .clone()
        .oneshot(post_items(
            "people",
            json!({"keyField": "id", "items": [{"name": "nobody"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());

    let response = router
        .oneshot(post_items("people", json!({"keyField": "", "items": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.commit_count(), 0);
}
