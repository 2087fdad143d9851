//! Error taxonomy for cache acquisition

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Every way a cache acquisition can terminate unsuccessfully.
///
/// The error is `Clone` so that a single acquisition result can be handed to
/// every request coalesced onto the same in-flight download.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream {url} answered {status}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("error downloading {url}: {message}")]
    UpstreamTransport { url: String, message: String },

    #[error("error reading response body from {url}")]
    UpstreamBody {
        url: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("unsupported media type {mime}")]
    UnsupportedMedia { mime: &'static str },

    #[error("error {op} {}", .path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn storage(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            op,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn upstream_body(url: impl Into<String>, source: io::Error) -> Self {
        Self::UpstreamBody {
            url: url.into(),
            source: Arc::new(source),
        }
    }

    /// HTTP status reported to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UnsupportedMedia { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UpstreamTransport { .. }
            | Self::UpstreamBody { .. }
            | Self::Storage { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure is a server-side fault worth an operator's attention.
    pub fn is_server_fault(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!(status = status.as_u16(), error = %self, "responding with error");
        status_text(status)
    }
}

/// Plain-text response carrying only the canonical reason phrase.
pub fn status_text(status: StatusCode) -> Response {
    let text = status.canonical_reason().unwrap_or("Unknown");
    (status, format!("{}\n", text)).into_response()
}

pub type Result<T> = std::result::Result<T, CacheError>;
