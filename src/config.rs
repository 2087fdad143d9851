//! Configuration management for roxy

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a TOML configuration file
pub const ENV_CONFIG: &str = "ROXY_CONFIG";
pub const ENV_ADDR: &str = "ROXY_ADDR";
pub const ENV_CACHE_DIR: &str = "ROXY_CACHE_DIR";
pub const ENV_SSL_NO_VERIFY: &str = "ROXY_SSL_NO_VERIFY";
pub const ENV_CLIENT_TIMEOUT: &str = "ROXY_CLIENT_TIMEOUT";
pub const ENV_SERVER_READ_TIMEOUT: &str = "ROXY_SERVER_READ_TIMEOUT";
pub const ENV_SERVER_WRITE_TIMEOUT: &str = "ROXY_SERVER_WRITE_TIMEOUT";

/// Subdirectory created under the user cache directory
const CACHE_SUBDIR: &str = "roxy";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Deadline for producing a response, in seconds (0 disables)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Deadline for reading a request body, in seconds (0 disables)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            request_timeout_seconds: default_request_timeout(),
            read_timeout_seconds: default_read_timeout(),
        }
    }
}

impl ServerConfig {
    /// Listen address with an empty host (`:8080`) bound to all interfaces
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then(|| Duration::from_secs(self.request_timeout_seconds))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_seconds > 0).then(|| Duration::from_secs(self.read_timeout_seconds))
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache root directory; discovered at startup when unset
    pub dir: Option<PathBuf>,
}

/// Upstream client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Overall request timeout in seconds, including the body (0 disables)
    #[serde(default = "default_client_timeout")]
    pub timeout_seconds: u64,

    /// Skip TLS certificate and host name verification
    #[serde(default)]
    pub ssl_no_verify: bool,

    /// User-Agent sent upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_client_timeout(),
            ssl_no_verify: false,
            user_agent: default_user_agent(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `ROXY_CONFIG` when set, else defaults, then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(ENV_CONFIG) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `ROXY_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored. Timeouts that parse but are not positive keep
    /// the current value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(addr) = var(ENV_ADDR) {
            self.server.addr = addr;
        }

        if let Some(dir) = var(ENV_CACHE_DIR) {
            self.cache.dir = Some(PathBuf::from(dir));
        }

        if let Some(value) = var(ENV_SSL_NO_VERIFY) {
            self.upstream.ssl_no_verify = parse_bool(&value).with_context(|| {
                format!("config: error parsing environment variable {}", ENV_SSL_NO_VERIFY)
            })?;
        }

        let seconds = |name: &str, current: &mut u64| -> Result<()> {
            if let Some(value) = var(name) {
                let parsed: i64 = value.trim().parse().with_context(|| {
                    format!("config: error parsing environment variable {}", name)
                })?;
                if parsed > 0 {
                    *current = parsed as u64;
                }
            }
            Ok(())
        };
        seconds(ENV_CLIENT_TIMEOUT, &mut self.upstream.timeout_seconds)?;
        seconds(ENV_SERVER_READ_TIMEOUT, &mut self.server.read_timeout_seconds)?;
        seconds(ENV_SERVER_WRITE_TIMEOUT, &mut self.server.request_timeout_seconds)?;

        Ok(())
    }
}

/// Parse a boolean the way the query flag and environment accept it.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => bail!("invalid boolean value {:?}", other),
    }
}

/// Default cache root: `$XDG_CACHE_HOME/roxy`, `$HOME/.cache/roxy`, or `<tmp>/roxy`.
pub fn default_cache_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(".cache"))
        })
        .unwrap_or_else(std::env::temp_dir);
    base.join(CACHE_SUBDIR)
}

/// Verify that `dir` exists, is a directory, and accepts new files.
pub fn check_storage_dir(dir: &Path) -> Result<()> {
    let meta = std::fs::metadata(dir)
        .with_context(|| format!("invalid storage directory {}", dir.display()))?;
    if !meta.is_dir() {
        bail!("invalid storage directory {}: not a directory", dir.display());
    }

    tempfile::Builder::new()
        .prefix(".probe-")
        .tempfile_in(dir)
        .with_context(|| format!("invalid storage directory {}: not writable", dir.display()))?;

    Ok(())
}

// Default value functions
fn default_addr() -> String { "0.0.0.0:8080".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_read_timeout() -> u64 { 5 }
fn default_client_timeout() -> u64 { 30 }
fn default_user_agent() -> String { format!("roxy/{}", env!("CARGO_PKG_VERSION")) }
fn default_log_level() -> String { "info".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.addr, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.server.read_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.upstream.timeout_seconds, 30);
        assert!(!config.upstream.ssl_no_verify);
        assert!(config.cache.dir.is_none());
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            addr = "127.0.0.1:9000"

            [cache]
            dir = "/srv/roxy"

            [upstream]
            ssl_no_verify = true

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.addr, "127.0.0.1:9000");
        assert_eq!(config.server.request_timeout_seconds, 30);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/srv/roxy")));
        assert!(config.upstream.ssl_no_verify);
        assert_eq!(config.upstream.timeout_seconds, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                (ENV_ADDR, ":80"),
                (ENV_SSL_NO_VERIFY, "true"),
                (ENV_CLIENT_TIMEOUT, "1"),
                (ENV_SERVER_READ_TIMEOUT, "7"),
                (ENV_SERVER_WRITE_TIMEOUT, "10"),
                (ENV_CACHE_DIR, "/tmp/roxy"),
            ]))
            .unwrap();

        assert_eq!(config.server.addr, ":80");
        assert_eq!(config.server.listen_addr(), "0.0.0.0:80");
        assert!(config.upstream.ssl_no_verify);
        assert_eq!(config.upstream.timeout_seconds, 1);
        assert_eq!(config.server.read_timeout_seconds, 7);
        assert_eq!(config.server.request_timeout_seconds, 10);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/roxy")));
    }

    #[test]
    fn test_env_non_positive_durations_keep_defaults() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                (ENV_CLIENT_TIMEOUT, "-1"),
                (ENV_SERVER_READ_TIMEOUT, "0"),
                (ENV_SERVER_WRITE_TIMEOUT, "0"),
            ]))
            .unwrap();

        assert_eq!(config.upstream.timeout_seconds, 30);
        assert_eq!(config.server.read_timeout_seconds, 5);
        assert_eq!(config.server.request_timeout_seconds, 30);
    }

    #[test]
    fn test_env_parse_errors_name_the_variable() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[(ENV_SSL_NO_VERIFY, "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SSL_NO_VERIFY));

        let err = config
            .apply_env(env(&[(ENV_CLIENT_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CLIENT_TIMEOUT));

        let err = config
            .apply_env(env(&[(ENV_SERVER_READ_TIMEOUT, "5s")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_SERVER_READ_TIMEOUT));
    }

    #[test]
    fn test_parse_bool() {
        for v in ["1", "t", "T", "TRUE", "true", "True"] {
            assert!(parse_bool(v).unwrap());
        }
        for v in ["0", "f", "F", "FALSE", "false", "False"] {
            assert!(!parse_bool(v).unwrap());
        }
        assert!(parse_bool("yes").is_err());
        assert!(parse_bool("").is_err());
    }

    #[test]
    fn test_check_storage_dir() {
        let temp_dir = tempdir().unwrap();
        assert!(check_storage_dir(temp_dir.path()).is_ok());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);

        let file = temp_dir.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        assert!(check_storage_dir(&file).is_err());
        assert!(check_storage_dir(&temp_dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/roxy.toml").is_err());
    }
}
