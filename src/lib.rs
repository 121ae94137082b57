pub mod config;
pub mod error;
pub mod inflect;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod transform;
pub mod watchers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::{AppState, SharedState};
use crate::store::Store;

/// Request-wide deadline for query handlers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_app(store: Arc<Store>, config: Config) -> Router {
    let state: SharedState = Arc::new(AppState { store, config });

    Router::new()
        .merge(routes::api_routes())
        .route("/health", get(health))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The store is the only stateful dependency; while it is open the service
/// is healthy.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}
