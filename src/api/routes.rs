use axum::{
    routing::{delete, get, put},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/aggregates/{root_id}", delete(handlers::delete_aggregate))
        .route(
            "/aggregates/recompute",
            get(handlers::drift_analysis)
                .post(handlers::recompute_all)
                .delete(handlers::delete_recompute_aggregate),
        )
        .route(
            "/aggregates/{root_id}/financials",
            put(handlers::update_financials),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
