//! Cache acquisition: resolve, look up, and on a miss fetch, validate,
//! publish and record an upstream resource.

use super::{
    read_prefix, AtomicPublisher, CacheKey, ContentValidator, MediaTypes, MetaIndex, Role,
    SingleFlight, SNIFF_LEN,
};
use crate::error::{CacheError, Result};
use crate::metrics;
use crate::upstream::Upstream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

/// Payload name used when the request path has no usable final segment.
const FALLBACK_NAME: &str = "file";

/// Where an acquisition's answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Meta record already present
    Hit,
    /// Downloaded and published by this request
    Fetched,
    /// Shared the result of a concurrent request for the same key
    Coalesced,
}

/// Result of a successful acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub key: CacheKey,
    /// Payload path relative to the cache root, as stored in the meta record
    pub relative_path: String,
    pub outcome: Outcome,
}

/// Orchestrates the acquisition of upstream resources into the cache
pub struct Acquirer {
    index: MetaIndex,
    upstream: Arc<dyn Upstream>,
    validator: ContentValidator,
    publisher: AtomicPublisher,
    flights: SingleFlight<CacheKey, Result<String>>,
}

impl Acquirer {
    pub fn new(root: impl Into<PathBuf>, upstream: Arc<dyn Upstream>, media_types: MediaTypes) -> Self {
        Self {
            index: MetaIndex::new(root),
            upstream,
            validator: ContentValidator::new(media_types),
            publisher: AtomicPublisher::new(),
            flights: SingleFlight::new(),
        }
    }

    pub fn index(&self) -> &MetaIndex {
        &self.index
    }

    /// Acquire the resource at `path` (host and path, no scheme), fetched
    /// over HTTPS when `ssl` is set.
    pub async fn acquire(self: &Arc<Self>, path: &str, ssl: bool) -> Result<Acquired> {
        if path.is_empty() {
            return Err(CacheError::BadRequest("empty path".to_string()));
        }

        let key = CacheKey::new(path, ssl);

        if let Some(relative_path) = self.index.lookup(&key).await? {
            metrics::record_cache_hit();
            debug!(key = %key, "meta hit");
            return Ok(Acquired {
                key,
                relative_path,
                outcome: Outcome::Hit,
            });
        }
        metrics::record_cache_miss();

        let this = Arc::clone(self);
        let flight_key = key.clone();
        let request_path = path.to_string();
        let (result, role) = self
            .flights
            .run(key.clone(), async move {
                let result = this.populate(&flight_key, &request_path).await;
                if let Err(e) = &result {
                    report(&flight_key, e);
                }
                result
            })
            .await
            .map_err(|e| CacheError::Internal(format!("acquisition of {} failed: {}", key, e)))?;

        let outcome = match role {
            Role::Leader => Outcome::Fetched,
            Role::Follower => {
                metrics::record_coalesced();
                Outcome::Coalesced
            }
        };

        result.map(|relative_path| Acquired {
            key,
            relative_path,
            outcome,
        })
    }

    /// Miss path. Runs once per key at a time under the single-flight registry.
    async fn populate(&self, key: &CacheKey, path: &str) -> Result<String> {
        // A flight that finished just before this one started already did the work.
        if let Some(relative_path) = self.index.lookup(key).await? {
            return Ok(relative_path);
        }

        let dir = self.index.entry_dir(key);
        self.publisher.ensure_dir(&dir).await?;

        let url = key.url();
        let response = self.upstream.fetch(url).await?;
        if response.status != 200 {
            return Err(CacheError::UpstreamStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        let mut body = response.body;

        let prefix = read_prefix(&mut body, SNIFF_LEN)
            .await
            .map_err(|e| CacheError::upstream_body(url, e))?;

        let sniffed = self.validator.validate(&prefix).inspect_err(|_| {
            metrics::record_unsupported_media();
        })?;

        let file_name = payload_name(path, sniffed.extension);
        let published = self
            .publisher
            .publish(&dir, &file_name, &prefix, &mut body, url)
            .await?;

        let relative_path = key.relative_file(&file_name);
        if let Err(e) = self.index.write(key, &relative_path).await {
            // Without its record the payload is unreachable; take it back out.
            if let Err(remove_err) = tokio::fs::remove_file(&published.path).await {
                warn!(
                    path = %published.path.display(),
                    error = %remove_err,
                    "failed to remove payload after meta write failure"
                );
            }
            return Err(e);
        }

        info!(
            url = %url,
            mime = sniffed.mime,
            bytes = published.bytes,
            path = %relative_path,
            "cached upstream resource"
        );
        Ok(relative_path)
    }
}

/// Log level for a failed acquisition: client-class outcomes stay at debug,
/// upstream 5xx answers at warn, everything else on our side at error.
fn severity(err: &CacheError) -> Level {
    match err {
        _ if !err.is_server_fault() => Level::DEBUG,
        CacheError::UpstreamStatus { .. } => Level::WARN,
        _ => Level::ERROR,
    }
}

/// Record a failed acquisition once, at the point it was detected.
fn report(key: &CacheKey, err: &CacheError) {
    let cause = std::error::Error::source(err).map(|c| c.to_string());
    let level = severity(err);
    if level == Level::ERROR {
        error!(key = %key, error = %err, cause = ?cause, "acquisition failed");
    } else if level == Level::WARN {
        warn!(key = %key, error = %err, "acquisition failed upstream");
    } else {
        debug!(key = %key, error = %err, "acquisition rejected");
    }
}

/// File name for the stored payload: the final segment of `path` with its
/// extension replaced by `extension`.
pub fn payload_name(path: &str, extension: &str) -> String {
    let base = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .filter(|segment| *segment != "." && *segment != "..")
        .unwrap_or(FALLBACK_NAME);

    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };

    format!("{}{}", stem, extension)
}
