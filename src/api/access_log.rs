//! Access logging
//!
//! The response body is wrapped in [`MeteredBody`], which counts bytes as the
//! server writes them and emits one access-log event when the body finishes
//! or is dropped.

use crate::metrics;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{Method, StatusCode, Uri, Version};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::info;

/// Request details captured before the handler runs
#[derive(Debug, Clone)]
struct RequestLine {
    remote_addr: Option<SocketAddr>,
    method: Method,
    uri: Uri,
    version: Version,
    started: Instant,
}

/// Response body decorator tracking status and bytes written
pub struct MeteredBody {
    inner: Body,
    status: StatusCode,
    bytes: u64,
    request: Option<RequestLine>,
}

impl MeteredBody {
    fn new(inner: Body, status: StatusCode, request: RequestLine) -> Self {
        Self {
            inner,
            status,
            bytes: 0,
            request: Some(request),
        }
    }

    /// Status code of the response
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Body bytes handed to the connection so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn finish(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        let elapsed = request.started.elapsed().as_secs_f64();
        metrics::record_request(request.method.as_str(), self.status.as_u16(), elapsed);

        let remote = request
            .remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!(
            target: "roxy::access",
            remote_addr = %remote,
            method = %request.method,
            uri = %request.uri,
            version = ?request.version,
            status = self.status.as_u16(),
            bytes = self.bytes,
            elapsed_ms = elapsed * 1000.0,
            "request"
        );
    }
}

impl HttpBody for MeteredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
            }
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for MeteredBody {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Middleware wrapping every response body in a [`MeteredBody`]
pub async fn access_log(request: Request, next: Next) -> Response {
    let line = RequestLine {
        remote_addr: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
        method: request.method().clone(),
        uri: request.uri().clone(),
        version: request.version(),
        started: Instant::now(),
    };

    let response = next.run(request).await;
    let (parts, body) = response.into_parts();
    let metered = MeteredBody::new(body, parts.status, line);
    Response::from_parts(parts, Body::new(metered))
}
