use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{handlers, state::AppState};

const MAX_BODY_BYTES: usize = 256 * 1024;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::service_info))
        // `get` also answers HEAD
        .route("/healthz", get(handlers::health))
        .route("/healthz/", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/execute", post(handlers::execute))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
