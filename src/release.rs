//! GitHub release lookup for the server artifact.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::ReleaseConfig;
use crate::download::TransferRequest;
use crate::error::{Error, Result};

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Number of downloads so far.
    #[serde(default)]
    pub download_count: u64,
    /// Content digest such as `sha256:<hex>`, when GitHub provides one.
    #[serde(default)]
    pub digest: Option<String>,
}

impl Asset {
    /// Hex SHA-256 digest from the `digest` field, if present.
    #[must_use]
    pub fn sha256(&self) -> Option<&str> {
        self.digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
            .filter(|hex| !hex.is_empty())
    }
}

/// A GitHub release as returned by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Git tag of the release.
    #[serde(default)]
    pub tag_name: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Release notes.
    #[serde(default)]
    pub body: Option<String>,
    /// Publication time.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Attached files.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Short description of a release for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Tag, or "Unknown".
    pub version: String,
    /// Name, or "Unknown".
    pub name: String,
    /// Release notes, possibly empty.
    pub description: String,
    /// Publication time, if known.
    pub published_at: Option<DateTime<Utc>>,
    /// Downloads summed over all assets.
    pub download_count: u64,
}

impl Release {
    /// First asset whose name starts with `prefix` and ends with `suffix`.
    #[must_use]
    pub fn find_asset(&self, prefix: &str, suffix: &str) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|a| a.name.starts_with(prefix) && a.name.ends_with(suffix))
    }

    /// Summarises the release.
    #[must_use]
    pub fn info(&self) -> ReleaseInfo {
        ReleaseInfo {
            version: self.tag_name.clone().unwrap_or_else(|| "Unknown".to_string()),
            name: self.name.clone().unwrap_or_else(|| "Unknown".to_string()),
            description: self.body.clone().unwrap_or_default(),
            published_at: self.published_at,
            download_count: self.assets.iter().map(|a| a.download_count).sum(),
        }
    }

    /// Builds a transfer for `asset`, tagged with this release and carrying its digest.
    #[must_use]
    pub fn transfer_request(&self, asset: &Asset, destination: impl Into<PathBuf>) -> TransferRequest {
        let mut request = TransferRequest::new(asset.browser_download_url.clone(), destination);
        if let Some(tag) = &self.tag_name {
            request = request.with_version_tag(tag.clone());
        }
        if let Some(digest) = asset.sha256() {
            request = request.with_expected_digest(digest);
        }
        request
    }
}

/// Client for the GitHub releases API.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: reqwest::Client,
    config: ReleaseConfig,
}

impl ReleaseClient {
    /// Creates a client with a 10 second timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ReleaseConfig, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, config: ReleaseConfig) -> Self {
        Self { client, config }
    }

    /// Returns the release configuration.
    #[must_use]
    pub const fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// URL of the latest-release endpoint.
    #[must_use]
    pub fn latest_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        )
    }

    /// Fetches the latest release.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository is not configured, the request fails,
    /// or the response is not a release.
    pub async fn latest_release(&self) -> Result<Release> {
        if !self.config.is_configured() {
            return Err(Error::Release("repository owner/name not configured".into()));
        }

        let url = self.latest_url();
        log::debug!("Fetching release info from {url}");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::Release(format!("invalid release JSON: {e}")))
    }

    /// Fetches the latest release and picks the configured asset from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails or no asset matches.
    pub async fn latest_asset(&self) -> Result<(Release, Asset)> {
        let release = self.latest_release().await?;
        let asset = release
            .find_asset(&self.config.asset_prefix, &self.config.asset_suffix)
            .cloned()
            .ok_or_else(|| {
                Error::Release(format!(
                    "no asset matching {}*{} in release {}",
                    self.config.asset_prefix,
                    self.config.asset_suffix,
                    release.info().version
                ))
            })?;
        log::info!(
            "Found {} ({} bytes) in release {}",
            asset.name,
            asset.size,
            release.info().version
        );
        Ok((release, asset))
    }
}
