//! Cache key derivation for upstream resources

use md5::{Digest, Md5};
use std::fmt;
use std::path::PathBuf;

/// Length of the shard prefix taken from the front of the hash.
const SHARD_PREFIX_LEN: usize = 2;

/// Unique key for a cached upstream resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Upstream URL the key was derived from (scheme folded in)
    url: String,
    /// Hex digest of `url`
    hash: String,
}

impl CacheKey {
    /// Create a key for `path` fetched over HTTPS when `ssl` is set, HTTP otherwise.
    ///
    /// `path` is the host and path as submitted by the client, without a scheme.
    pub fn new(path: &str, ssl: bool) -> Self {
        let scheme = if ssl { "https" } else { "http" };
        let url = format!("{}://{}", scheme, path);
        let hash = hex::encode(Md5::digest(url.as_bytes()));

        Self { url, hash }
    }

    /// Fully qualified upstream URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the hash string
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Shard prefix and remaining suffix of the hash
    pub fn shard(&self) -> (&str, &str) {
        self.hash.split_at(SHARD_PREFIX_LEN)
    }

    /// Entry directory relative to the cache root: `<prefix>/<suffix>`
    pub fn relative_dir(&self) -> PathBuf {
        let (prefix, suffix) = self.shard();
        PathBuf::from(prefix).join(suffix)
    }

    /// Relative path of a payload file as it appears in public pointers.
    pub fn relative_file(&self, file_name: &str) -> String {
        let (prefix, suffix) = self.shard();
        format!("{}/{}/{}", prefix, suffix, file_name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hash, self.url)
    }
}
