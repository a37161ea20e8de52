//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Health / heartbeat route
//! - The frame endpoint and the JSON request-status view under `/api`
//! - Static files (frame images and rendered results) from the public directory

mod frame;
mod health;
mod requests;

use axum::{Router, middleware};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(frame::router())
        .merge(requests::router());

    Router::new()
        .merge(health::router())
        .nest("/api", api_router)
        .fallback_service(ServeDir::new(&state.config.public_dir))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}
