//! Configuration loading and management
//!
//! Handles parsing of `.td.toml` in the data directory.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::storage::DEFAULT_SLOT_QUOTA_BYTES;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task record store
    #[serde(default)]
    pub records: RecordsConfig,

    /// Attachment blob store
    #[serde(default)]
    pub blobs: BlobsConfig,

    /// Offline asset cache
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    /// Slot key holding the serialized task array
    #[serde(default = "default_records_key")]
    pub key: String,

    /// Byte quota shared by all slots
    #[serde(default = "default_records_quota")]
    pub quota_bytes: u64,
}

fn default_records_key() -> String {
    "td_tasks_v5".to_string()
}

fn default_records_quota() -> u64 {
    DEFAULT_SLOT_QUOTA_BYTES
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            key: default_records_key(),
            quota_bytes: default_records_quota(),
        }
    }
}

/// Blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobsConfig {
    /// Name of the container directory holding image entries
    #[serde(default = "default_container")]
    pub container: String,

    /// Largest single image accepted
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Optional cap on the total bytes held by the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<u64>,
}

fn default_container() -> String {
    "images".to_string()
}

fn default_max_image_bytes() -> u64 {
    1024 * 1024
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            max_image_bytes: default_max_image_bytes(),
            quota_bytes: None,
        }
    }
}

/// Fetch policy for cached assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    CacheFirst,
    StaleWhileRevalidate,
}

/// One file in the install manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Path relative to the origin (e.g. `./index.html`)
    pub path: String,

    /// Installation fails when a critical asset cannot be fetched
    #[serde(default)]
    pub critical: bool,
}

impl AssetEntry {
    pub fn new(path: impl Into<String>, critical: bool) -> Self {
        Self {
            path: path.into(),
            critical,
        }
    }
}

/// Asset cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prefix; the namespace is `<prefix>-<version>`
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Deployed version tag
    #[serde(default = "default_cache_version")]
    pub version: String,

    /// Origin the manifest paths are resolved against
    #[serde(default = "default_origin")]
    pub origin: String,

    #[serde(default = "default_policy")]
    pub policy: CachePolicy,

    /// Manifest path served when an image is neither cached nor reachable
    #[serde(default = "default_placeholder", skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,

    /// Activate right after a successful install
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    #[serde(default = "default_assets")]
    pub assets: Vec<AssetEntry>,
}

fn default_name_prefix() -> String {
    "td-offline".to_string()
}

fn default_cache_version() -> String {
    "v4".to_string()
}

fn default_origin() -> String {
    "http://localhost:8080/".to_string()
}

fn default_policy() -> CachePolicy {
    CachePolicy::StaleWhileRevalidate
}

fn default_placeholder() -> Option<String> {
    Some("./icons/icon-192.png".to_string())
}

fn default_true() -> bool {
    true
}

fn default_assets() -> Vec<AssetEntry> {
    let critical = ["./", "./index.html", "./js/app.js", "./js/bootstrap/initApp.js"];
    let optional = [
        "./style.css",
        "./manifest.json",
        "./js/controllers/todoController.js",
        "./js/domain/todoRules.js",
        "./js/store/todoStore.js",
        "./js/store/imageStore.js",
        "./js/store/uiStore.js",
        "./js/view/todoView.js",
        "./icons/icon-192.png",
        "./icons/icon-512.png",
    ];
    critical
        .iter()
        .map(|path| AssetEntry::new(*path, true))
        .chain(optional.iter().map(|path| AssetEntry::new(*path, false)))
        .collect()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            version: default_cache_version(),
            origin: default_origin(),
            policy: default_policy(),
            placeholder: default_placeholder(),
            skip_waiting: default_true(),
            assets: default_assets(),
        }
    }
}

impl CacheConfig {
    /// Namespace directory name for the configured version
    pub fn namespace(&self) -> String {
        format!("{}-{}", self.name_prefix, self.version)
    }

    fn validate(&self) -> Result<()> {
        let valid_segment = |value: &str| {
            !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid_segment(&self.name_prefix) || !valid_segment(&self.version) {
            return Err(Error::InvalidConfig(format!(
                "cache namespace '{}' must be alphanumeric, '-', '_' or '.'",
                self.namespace()
            )));
        }

        let origin = url::Url::parse(&self.origin)
            .map_err(|e| Error::InvalidConfig(format!("cache.origin '{}': {}", self.origin, e)))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "cache.origin must be http or https, got '{}'",
                origin.scheme()
            )));
        }

        if !self.assets.iter().any(|asset| asset.critical) {
            return Err(Error::InvalidConfig(
                "cache.assets needs at least one critical entry".to_string(),
            ));
        }

        if let Some(placeholder) = &self.placeholder {
            if !self.assets.iter().any(|asset| &asset.path == placeholder) {
                return Err(Error::InvalidConfig(format!(
                    "cache.placeholder '{placeholder}' is not in cache.assets"
                )));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the data directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(crate::storage::CONFIG_FILE);
        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::lock::write_atomic(path, content.as_bytes())
    }

    fn validate(&self) -> Result<()> {
        if self.records.key.trim().is_empty() {
            return Err(Error::InvalidConfig("records.key must not be empty".to_string()));
        }
        if self.records.quota_bytes == 0 {
            return Err(Error::InvalidConfig("records.quota_bytes must be positive".to_string()));
        }
        if self.blobs.max_image_bytes == 0 {
            return Err(Error::InvalidConfig("blobs.max_image_bytes must be positive".to_string()));
        }
        if self.blobs.container.is_empty() || self.blobs.container.contains(['/', '\\']) {
            return Err(Error::InvalidConfig(format!(
                "blobs.container '{}' must be a plain directory name",
                self.blobs.container
            )));
        }
        self.cache.validate()?;
        Ok(())
    }
}
