//! HTTP front end: cache acquisition, payload serving and monitoring

mod access_log;
mod handlers;
mod routes;

pub use access_log::{access_log, MeteredBody};
pub use handlers::{pointer, request_scheme, X_CACHE};

use crate::cache::{Acquirer, MediaTypes};
use crate::config::{Config, ServerConfig};
use crate::upstream::{HttpUpstream, Upstream};
use anyhow::{Context, Result};
use axum::body::Body;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::map_request_body::MapRequestBodyLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutBody, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
pub struct AppState {
    pub cache_dir: PathBuf,
    pub acquirer: Arc<Acquirer>,
}

impl AppState {
    pub fn new(cache_dir: impl Into<PathBuf>, upstream: Arc<dyn Upstream>) -> Self {
        let cache_dir = cache_dir.into();
        let acquirer = Arc::new(Acquirer::new(cache_dir.clone(), upstream, MediaTypes::images()));
        Self { cache_dir, acquirer }
    }
}

/// Run the HTTP server until ctrl-c or SIGTERM
pub async fn run(config: &Config, cache_dir: &Path) -> Result<()> {
    let upstream = HttpUpstream::new(&config.upstream)?;
    let state = Arc::new(AppState::new(cache_dir, Arc::new(upstream)));

    let app = create_router(state, &config.server);

    let addr = config.server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(addr = %addr, cache_dir = %cache_dir.display(), "roxy listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

/// Create the router with all routes.
///
/// `server.request_timeout_seconds` bounds the time to produce a response and
/// `server.read_timeout_seconds` the time to read a request body.
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let mut router = Router::new()
        .merge(routes::health_routes())
        .merge(routes::cache_routes())
        .merge(routes::metrics_routes())
        .nest_service("/file", ServeDir::new(&state.cache_dir));

    if let Some(timeout) = server.request_timeout() {
        router = router.layer(TimeoutLayer::new(timeout));
    }

    if let Some(timeout) = server.read_timeout() {
        router = router.layer((
            RequestBodyTimeoutLayer::new(timeout),
            MapRequestBodyLayer::new(Body::new::<TimeoutBody<Body>>),
        ));
    }

    router
        .layer(middleware::from_fn(access_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
}
