//! Configuration types for download operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a ranged download.
///
/// Durations are kept as plain integers so the struct round-trips through
/// TOML without custom (de)serializers; use the accessor methods to get
/// [`Duration`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Number of byte ranges fetched concurrently.
    pub threads: usize,
    /// Upper bound on bytes written per read from a response body.
    pub read_buffer_size: usize,
    /// Fixed backoff between reconnection attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Consecutive failed attempts tolerated per chunk before giving up.
    /// An attempt that makes progress resets the count. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Wall-clock budget per chunk, in milliseconds, after which retrying stops.
    pub retry_deadline_ms: Option<u64>,
    /// Interval between progress samples, in milliseconds.
    pub progress_interval_ms: u64,
    /// TCP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// TCP keepalive interval, in seconds.
    pub tcp_keepalive_secs: u64,
    /// Optional proxy URL applied to every request.
    pub proxy: Option<String>,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Merge into `{filename}.part` and rename on success instead of writing in place.
    pub atomic_output: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            read_buffer_size: 32 * 1024,
            retry_delay_ms: 5_000,
            max_retries: None,
            retry_deadline_ms: None,
            progress_interval_ms: 1_000,
            connect_timeout_secs: 30,
            tcp_keepalive_secs: 30,
            proxy: None,
            user_agent: concat!("range-dl/", env!("CARGO_PKG_VERSION")).to_string(),
            atomic_output: true,
        }
    }
}

impl DownloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent range fetchers.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the backoff between reconnection attempts.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Caps the consecutive failed attempts tolerated per chunk.
    #[must_use]
    pub const fn with_max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the per-chunk retry deadline.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_retry_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.retry_deadline_ms = match deadline {
            Some(d) => Some(d.as_millis() as u64),
            None => None,
        };
        self
    }

    /// Sets the progress sampling interval.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Routes all requests through the given proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy.filter(|p| !p.is_empty());
        self
    }

    /// Sets whether merge writes through a `.part` file.
    #[must_use]
    pub const fn with_atomic_output(mut self, atomic: bool) -> Self {
        self.atomic_output = atomic;
        self
    }

    /// Backoff between reconnection attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Per-chunk retry deadline, if any.
    #[must_use]
    pub fn retry_deadline(&self) -> Option<Duration> {
        self.retry_deadline_ms.map(Duration::from_millis)
    }

    /// Interval between progress samples.
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// TCP connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// TCP keepalive interval.
    #[must_use]
    pub const fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }

    /// Checks the values the engine cannot work without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero thread count, a zero
    /// buffer size or a zero progress interval.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::InvalidConfig("thread count must be positive".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read buffer size must be positive".into()));
        }
        if self.progress_interval_ms == 0 {
            return Err(Error::InvalidConfig("progress interval must be positive".into()));
        }
        Ok(())
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("range-dl")
            .join("config.toml")
    }

    /// Loads a configuration from a TOML file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Loads the file at `path` if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.threads, 10);
        assert_eq!(config.read_buffer_size, 32 * 1024);
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.progress_interval(), Duration::from_secs(1));
        assert!(config.max_retries.is_none());
        assert!(config.retry_deadline().is_none());
        assert!(config.atomic_output);
    }

    #[test]
    fn builder_pattern() {
        let config = DownloadConfig::new()
            .with_threads(4)
            .with_retry_delay(Duration::from_millis(250))
            .with_max_retries(Some(3))
            .with_retry_deadline(Some(Duration::from_secs(60)))
            .with_proxy(Some("http://127.0.0.1:8080".into()))
            .with_atomic_output(false);

        assert_eq!(config.threads, 4);
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.max_retries, Some(3));
        assert_eq!(config.retry_deadline(), Some(Duration::from_secs(60)));
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert!(!config.atomic_output);
    }

    #[test]
    fn sub_second_retry_deadline_is_kept() {
        let config = DownloadConfig::new().with_retry_deadline(Some(Duration::from_millis(500)));
        assert_eq!(config.retry_deadline(), Some(Duration::from_millis(500)));

        let config = DownloadConfig::new().with_retry_deadline(Some(Duration::from_millis(1_500)));
        assert_eq!(config.retry_deadline(), Some(Duration::from_millis(1_500)));
        assert_eq!(
            crate::fetch::FetchOptions::from(&config).retry_deadline,
            Some(Duration::from_millis(1_500))
        );
    }

    #[test]
    fn empty_proxy_is_ignored() {
        let config = DownloadConfig::new().with_proxy(Some(String::new()));
        assert!(config.proxy.is_none());
    }

    #[test]
    fn validate_rejects_zero_threads() {
        let config = DownloadConfig::new().with_threads(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(DownloadConfig::default().validate().is_ok());
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = DownloadConfig::new().with_max_retries(Some(7));
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: DownloadConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn load_fills_missing_keys_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threads = 3\nretry_delay_ms = 100").unwrap();

        let config = DownloadConfig::load(file.path()).unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(100));
        assert_eq!(config.read_buffer_size, 32 * 1024);
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threads = \"many\"").unwrap();
        assert!(matches!(
            DownloadConfig::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn unreadable_file_is_invalid_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = DownloadConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(err.phase(), "config");
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = DownloadConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DownloadConfig::default());
    }
}
