//! Meta records: one small file per cache entry pointing at its payload
//!
//! The presence of `<root>/<prefix>/<suffix>/.meta` is the cache hit signal.
//! Its content is the payload path relative to the cache root, which is what
//! public pointers are built from. Records are written last during an
//! acquisition, through a temporary file and a rename, so a reader either sees
//! no record or a complete one.

use super::CacheKey;
use crate::error::{CacheError, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// File name of the meta record inside an entry directory
pub const META_FILE: &str = ".meta";

/// Prefix of temporary files created next to meta records
const META_TEMP_PREFIX: &str = ".meta-";

/// Index of meta records under a cache root
#[derive(Debug, Clone)]
pub struct MetaIndex {
    root_path: PathBuf,
}

impl MetaIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
        }
    }

    /// Root directory of the cache
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Directory holding the entry for `key`
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root_path.join(key.relative_dir())
    }

    /// Path of the meta record for `key`
    pub fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(META_FILE)
    }

    /// True if a meta record exists for `key`
    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let path = self.meta_path(key);
        fs::try_exists(&path)
            .await
            .map_err(|e| CacheError::storage("checking meta file", &path, e))
    }

    /// Read the relative payload path recorded for `key`
    pub async fn read(&self, key: &CacheKey) -> Result<String> {
        let path = self.meta_path(key);
        fs::read_to_string(&path)
            .await
            .map_err(|e| CacheError::storage("reading meta file", &path, e))
    }

    /// Lookup combining `exists` and `read`; a record that vanishes between
    /// the two calls is reported as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<String>> {
        let path = self.meta_path(key);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::storage("reading meta file", &path, e)),
        }
    }

    /// Record `relative_path` for `key`.
    ///
    /// The entry directory must already exist.
    pub async fn write(&self, key: &CacheKey, relative_path: &str) -> Result<()> {
        let dir = self.entry_dir(key);
        let dest = dir.join(META_FILE);
        let content = relative_path.as_bytes().to_vec();

        let target = dest.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &target, &content))
            .await
            .map_err(|e| CacheError::Internal(format!("meta writer task failed: {}", e)))?
            .map_err(|e| CacheError::storage("writing meta file", &dest, e))?;

        debug!(meta = %dest.display(), "wrote meta record");
        Ok(())
    }
}

fn write_atomic(dir: &Path, dest: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix(META_TEMP_PREFIX)
        .tempfile_in(dir)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
