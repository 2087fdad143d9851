//! Upstream fetching
//!
//! The acquisition path talks to upstream servers through the [`Upstream`]
//! trait so that tests can script responses, including bodies that fail
//! part-way through.

use crate::config::UpstreamConfig;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use std::io;
use std::time::{Duration, Instant};
use tracing::debug;

/// Response body as a stream of chunks
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Status line and body of an upstream response
pub struct UpstreamResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: BodyStream) -> Self {
        Self { status, body }
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Source of upstream resources
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue a GET for `url`.
    ///
    /// Transport failures are reported as [`CacheError::UpstreamTransport`];
    /// any status code, including non-200, is returned as a response.
    async fn fetch(&self, url: &str) -> Result<UpstreamResponse>;
}

/// Upstream backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.ssl_no_verify);

        if config.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_seconds));
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, url: &str) -> Result<UpstreamResponse> {
        let started = Instant::now();
        let result = self.client.get(url).send().await;
        crate::metrics::record_upstream_request(started.elapsed().as_secs_f64(), result.is_err());

        let response = result.map_err(|e| CacheError::UpstreamTransport {
            url: url.to_string(),
            message: describe(&e),
        })?;

        let status = response.status().as_u16();
        debug!(url = %url, status, "upstream responded");

        let body = response
            .bytes_stream()
            .map_err(|e| io::Error::other(describe(&e)))
            .boxed();

        Ok(UpstreamResponse::new(status, body))
    }
}

/// Flatten a reqwest error and its causes into one line.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
