//! API request handlers

use super::AppState;
use crate::cache::Outcome;
use crate::config::parse_bool;
use crate::error::{status_text, CacheError};
use axum::{
    extract::{Host, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header reporting whether the pointer came from an existing entry
pub const X_CACHE: &str = "x-cache";

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CacheParams {
    /// Fetch upstream over HTTPS
    pub ssl: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub build_time: String,
    pub git_commit: String,
}

// ============================================================================
// Cache handlers
// ============================================================================

/// `GET /cache/<path>[?ssl=bool]`: acquire the resource and answer with a
/// pointer to the cached copy.
pub async fn acquire(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    headers: HeaderMap,
    Path(path): Path<String>,
    Query(params): Query<CacheParams>,
) -> Result<Response, CacheError> {
    let ssl = match params.ssl.as_deref() {
        None | Some("") => false,
        Some(value) => parse_bool(value)
            .map_err(|_| CacheError::BadRequest(format!("invalid ssl flag {:?}", value)))?,
    };

    let acquired = state.acquirer.acquire(&path, ssl).await?;
    let pointer = pointer(request_scheme(&headers), &host, &acquired.relative_path);

    let cache_status = match acquired.outcome {
        Outcome::Hit => "HIT",
        Outcome::Fetched | Outcome::Coalesced => "MISS",
    };
    Ok(([(X_CACHE, cache_status)], pointer).into_response())
}

/// `GET /cache/` with nothing to fetch
pub async fn empty_path() -> CacheError {
    CacheError::BadRequest("empty path".to_string())
}

/// Public URL of a cached payload
pub fn pointer(scheme: &str, host: &str, relative_path: &str) -> String {
    format!("{}://{}/file/{}", scheme, host, relative_path)
}

/// Scheme the client used to reach us, as far as we can tell.
///
/// The server itself speaks plain HTTP, so anything else has to come from a
/// proxy in front of it.
pub fn request_scheme(headers: &HeaderMap) -> &'static str {
    let forwarded = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    match forwarded {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    }
}

// ============================================================================
// Health handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Version information
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
        git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
    })
}

// ============================================================================
// Metrics handlers
// ============================================================================

/// Prometheus scrape endpoint
pub async fn metrics() -> Response {
    match crate::metrics::encode() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            status_text(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
