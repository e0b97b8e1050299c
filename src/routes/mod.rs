//! Route modules for the HomeSystem pipeline server

pub mod documents;
mod extract;
pub mod health;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router())
        .nest("/documents", documents::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
