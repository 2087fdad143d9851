//! API route definitions

use super::handlers;
use super::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Health check routes
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/version", get(handlers::get_version))
}

/// Cache acquisition routes. Only GET is routed; other methods get 405.
pub fn cache_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cache", get(handlers::empty_path))
        .route("/cache/", get(handlers::empty_path))
        .route("/cache/*path", get(handlers::acquire))
}

/// Prometheus metrics
pub fn metrics_routes() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(handlers::metrics))
}
