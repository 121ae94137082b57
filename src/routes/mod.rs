pub mod events;

use axum::routing::get;
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/events", get(events::query_events))
        .route(
            "/api/v1/events/{namespace}/{resource_type}/{name}",
            get(events::object_history),
        )
}
