//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, Router};

pub use routes::{create_router, AppState};

/// API routes with the correlation-id and logging middleware applied
///
/// Layers run last-added first: context, then logging, then the handler.
pub fn api_router(state: AppState) -> Router {
    create_router()
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::context_middleware))
        .with_state(state)
}
