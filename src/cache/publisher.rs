//! Atomic publication of downloaded payloads
//!
//! Bytes are streamed into a uniquely named temporary file created in the
//! destination directory and renamed onto the final name once the whole body
//! has been written and synced. Same-directory placement keeps the rename on
//! one filesystem, so it is atomic: the payload is either absent or complete.

use crate::error::{CacheError, Result};
use crate::upstream::BodyStream;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Prefix of in-progress download files
pub const TEMP_PREFIX: &str = ".download-";

/// A successfully published payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Writes payload files via temp-file-and-rename
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicPublisher;

impl AtomicPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Create `dir` and its parents. Safe to race with other requests.
    pub async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| CacheError::storage("creating directory", dir, e))
    }

    /// Write `prefix` followed by the rest of `body` to `dir/file_name`.
    ///
    /// `dir` must already exist (see [`AtomicPublisher::ensure_dir`]). `url`
    /// identifies the upstream for error reporting. On any failure the
    /// temporary file is removed and nothing appears under `file_name`.
    pub async fn publish(
        &self,
        dir: &Path,
        file_name: &str,
        prefix: &[u8],
        body: &mut BodyStream,
        url: &str,
    ) -> Result<Published> {
        let (file, temp_path) = create_temp(dir).await?;
        let mut file = File::from_std(file);

        let mut written = prefix.len() as u64;
        file.write_all(prefix)
            .await
            .map_err(|e| CacheError::storage("writing to temp file", &*temp_path, e))?;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| CacheError::upstream_body(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| CacheError::storage("writing to temp file", &*temp_path, e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| CacheError::storage("flushing temp file", &*temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::storage("syncing temp file", &*temp_path, e))?;
        drop(file);

        let dest = dir.join(file_name);
        persist(temp_path, dest.clone()).await?;

        debug!(path = %dest.display(), bytes = written, "published payload");
        Ok(Published {
            path: dest,
            bytes: written,
        })
    }
}

async fn create_temp(dir: &Path) -> Result<(std::fs::File, TempPath)> {
    let owned = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&owned)
            .map(|named| named.into_parts())
            .map_err(|e| CacheError::storage("creating temp file in", &owned, e))
    })
    .await
    .map_err(|e| CacheError::Internal(format!("temp file task failed: {}", e)))?
}

/// Rename `temp` onto `dest`. On failure the temporary path is dropped, which
/// removes the file.
async fn persist(temp: TempPath, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        temp.persist(&dest)
            .map_err(|e| CacheError::storage("renaming temp file to", &dest, e.error))
    })
    .await
    .map_err(|e| CacheError::Internal(format!("rename task failed: {}", e)))?
}
