//! Configuration types for download operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Default attempt budget when a request does not set one.
    pub max_attempts: u32,
    /// Seconds allowed for connecting and receiving response headers.
    pub request_timeout_secs: u64,
    /// Size of the chunks written to disk.
    pub chunk_size: usize,
    /// Minimum milliseconds between progress events.
    pub progress_interval_ms: u64,
    /// Milliseconds to wait before retrying an attempt.
    pub retry_delay_ms: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            request_timeout_secs: 30,
            chunk_size: 8 * 1024,
            progress_interval_ms: 500,
            retry_delay_ms: 1000,
            user_agent: concat!("lumi-dl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DownloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the header timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the write chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the minimum interval between progress events.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the backoff between attempts.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the User-Agent header.
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Header timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Progress interval as a `Duration`.
    #[must_use]
    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Retry backoff as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Where to look up the server artifact on GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Base URL of the GitHub REST API.
    pub api_base: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Required prefix of the asset file name.
    pub asset_prefix: String,
    /// Required suffix of the asset file name.
    pub asset_suffix: String,
    /// File name to save the asset under; the asset's own name when unset.
    pub artifact_name: Option<String>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            asset_prefix: "Lumi".to_string(),
            asset_suffix: ".jar".to_string(),
            artifact_name: None,
        }
    }
}

impl ReleaseConfig {
    /// Returns true once both owner and repository are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty()
    }

    /// Parses an `owner/repo` pair, keeping the other fields.
    ///
    /// Returns `None` if the string is not of the form `owner/repo`.
    #[must_use]
    pub fn with_repo_spec(mut self, spec: &str) -> Option<Self> {
        let (owner, repo) = spec.split_once('/')?;
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        self.owner = owner.to_string();
        self.repo = repo.to_string();
        Some(self)
    }
}

/// Path configuration for install and config directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory where downloaded artifacts are saved.
    pub install_dir: PathBuf,
    /// Directory where configuration files are read from.
    pub config_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            install_dir: PathBuf::from("."),
            config_dir: config_dir.join("lumi-dl"),
        }
    }
}

/// Complete application configuration combining download, release, and path settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Download configuration.
    pub download: DownloadConfig,
    /// Release lookup configuration.
    pub release: ReleaseConfig,
    /// Path configuration.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathConfig::default().config_dir.join("config.toml")
    }

    /// Loads configuration from `path`, falling back to defaults when the file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents)?;
                log::debug!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(crate::Error::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Loads configuration from the default location.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::load_from`].
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&Self::default_path())
    }
}
