//! Versioned offline cache for the application's static files.
//!
//! Each deployed version owns one namespace directory, `<prefix>-<version>`,
//! under the cache root:
//!
//! ```text
//! cache/
//!   td-offline-v4/
//!     state.json            # lifecycle state of this namespace
//!     entries/<sha256>.json # one response snapshot per URL
//!   .staging-td-offline-v5/ # install in progress
//! ```
//!
//! Lifecycle: `installing -> waiting -> active -> superseded`. An install is
//! built in a staging directory and only replaces the namespace once every
//! critical asset has been fetched, so a failed install never damages the
//! copy currently being served. Until the configured namespace is active,
//! requests are answered from the namespace on disk that still is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{CacheConfig, CachePolicy};
use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};

const STATE_FILE: &str = "state.json";
const ENTRIES_DIR: &str = "entries";
const STAGING_PREFIX: &str = ".staging-";
const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "avif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Installing,
    Waiting,
    Active,
    Superseded,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CacheState::Installing => "installing",
            CacheState::Waiting => "waiting",
            CacheState::Active => "active",
            CacheState::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamespaceRecord {
    namespace: String,
    state: CacheState,
    #[serde(skip_serializing_if = "Option::is_none")]
    installed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    claimed: bool,
}

/// Snapshot of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl AssetResponse {
    pub fn ok(content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    stored_at: DateTime<Utc>,
    body: String,
}

/// Outbound request as seen by the cache
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: String,
    pub url: Url,
}

impl AssetRequest {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }
}

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
    Placeholder,
}

#[derive(Debug)]
pub struct Served {
    pub response: AssetResponse,
    pub source: ResponseSource,
    /// Background refresh started for a stale-while-revalidate hit
    pub revalidation: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the caller talks to the network directly
    Passthrough,
    Served(Served),
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedAsset {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub namespace: String,
    pub cached: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedAsset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub namespace: String,
    pub purged: Vec<String>,
    pub claimed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStatus {
    pub namespace: String,
    pub state: CacheState,
    pub current: bool,
    pub entries: usize,
}

/// Source of fresh responses
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<AssetResponse>;
}

/// Network access over HTTP(S)
#[derive(Debug, Clone, Default)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, url: &Url) -> Result<AssetResponse> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(AssetResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Cache key: the URL without its fragment
fn normalize(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

fn entry_file(entries: &Path, url: &Url) -> PathBuf {
    let digest = Sha256::digest(normalize(url).as_str().as_bytes());
    entries.join(format!("{}.json", hex::encode(digest)))
}

fn is_image(url: &Url) -> bool {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

async fn read_entry(entries: &Path, url: &Url) -> Result<Option<AssetResponse>> {
    let raw = match tokio::fs::read(entry_file(entries, url)).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let stored: StoredEntry = serde_json::from_slice(&raw)?;
    let body = base64::engine::general_purpose::STANDARD
        .decode(stored.body)
        .map_err(|err| Error::OperationFailed(format!("corrupt cache entry for {url}: {err}")))?;
    Ok(Some(AssetResponse {
        status: stored.status,
        content_type: stored.content_type,
        body,
    }))
}

async fn write_entry(entries: &Path, url: &Url, response: &AssetResponse) -> Result<()> {
    let stored = StoredEntry {
        url: normalize(url).to_string(),
        status: response.status,
        content_type: response.content_type.clone(),
        stored_at: Utc::now(),
        body: base64::engine::general_purpose::STANDARD.encode(&response.body),
    };
    let data = serde_json::to_vec(&stored)?;
    let path = entry_file(entries, url);
    tokio::task::spawn_blocking(move || lock::write_atomic(&path, &data))
        .await
        .map_err(|err| Error::OperationFailed(err.to_string()))?
}

/// Cached copy of `url`; an unreadable entry counts as a miss
async fn read_entry_or_miss(entries: &Path, url: &Url) -> Option<AssetResponse> {
    match read_entry(entries, url).await {
        Ok(found) => found,
        Err(err) => {
            tracing::warn!(url = %url, error = %err, "unreadable cache entry; treating as a miss");
            None
        }
    }
}

async fn read_record(dir: &Path) -> Result<Option<NamespaceRecord>> {
    match tokio::fs::read(dir.join(STATE_FILE)).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn write_record(dir: &Path, record: &NamespaceRecord) -> Result<()> {
    let data = serde_json::to_vec_pretty(record)?;
    let path = dir.join(STATE_FILE);
    tokio::task::spawn_blocking(move || {
        lock::write_atomic_locked(&path, &data, DEFAULT_LOCK_TIMEOUT_MS)
    })
    .await
    .map_err(|err| Error::OperationFailed(err.to_string()))?
}

async fn count_entries(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir.join(ENTRIES_DIR)).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
            count += 1;
        }
    }
    Ok(count)
}

pub struct AssetCache {
    root: PathBuf,
    config: CacheConfig,
    origin: Url,
    network: Arc<dyn Network>,
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("root", &self.root)
            .field("namespace", &self.config.namespace())
            .field("origin", &self.origin.as_str())
            .finish()
    }
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>, config: CacheConfig, network: Arc<dyn Network>) -> Result<Self> {
        let origin = Url::parse(&config.origin)
            .map_err(|err| Error::InvalidConfig(format!("cache.origin '{}': {}", config.origin, err)))?;
        Ok(Self {
            root: root.into(),
            config,
            origin,
            network,
        })
    }

    pub fn namespace(&self) -> String {
        self.config.namespace()
    }

    fn namespace_dir(&self) -> PathBuf {
        self.root.join(self.namespace())
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(format!("{STAGING_PREFIX}{}", self.namespace()))
    }

    /// Absolute URL of a manifest path
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|err| Error::InvalidArgument(format!("asset path '{path}': {err}")))
    }

    /// Lifecycle state of the current namespace, if installed at all
    pub async fn state(&self) -> Result<Option<CacheState>> {
        Ok(read_record(&self.namespace_dir()).await?.map(|record| record.state))
    }

    /// Fetch the manifest into a fresh copy of the current namespace
    pub async fn install(&self) -> Result<InstallReport> {
        let namespace = self.namespace();
        let staging = self.staging_dir();
        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(staging.join(ENTRIES_DIR)).await?;

        let mut record = NamespaceRecord {
            namespace: namespace.clone(),
            state: CacheState::Installing,
            installed_at: None,
            activated_at: None,
            claimed: false,
        };
        write_record(&staging, &record).await?;
        tracing::debug!(namespace = %namespace, "installing asset cache");

        let mut report = InstallReport {
            namespace: namespace.clone(),
            cached: Vec::new(),
            skipped: Vec::new(),
        };

        for asset in &self.config.assets {
            let url = self.resolve(&asset.path)?;
            let failure = match self.network.fetch(&url).await {
                Ok(response) if response.is_ok() => {
                    write_entry(&staging.join(ENTRIES_DIR), &url, &response).await?;
                    report.cached.push(url.to_string());
                    continue;
                }
                Ok(response) => format!("HTTP {}", response.status),
                Err(err) => err.to_string(),
            };

            if asset.critical {
                tracing::warn!(url = %url, reason = %failure, "critical asset unavailable; install aborted");
                if let Err(err) = tokio::fs::remove_dir_all(&staging).await {
                    tracing::warn!(error = %err, "could not remove staging directory");
                }
                return Err(Error::CacheInstall {
                    url: url.to_string(),
                    reason: failure,
                });
            }
            tracing::warn!(url = %url, reason = %failure, "skipping optional asset");
            report.skipped.push(SkippedAsset {
                url: url.to_string(),
                reason: failure,
            });
        }

        record.state = CacheState::Waiting;
        record.installed_at = Some(Utc::now());
        write_record(&staging, &record).await?;

        let target = self.namespace_dir();
        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging, &target).await?;

        Ok(report)
    }

    /// Make the installed namespace current and purge every other one
    pub async fn activate(&self) -> Result<ActivationReport> {
        let dir = self.namespace_dir();
        let mut record = match read_record(&dir).await? {
            Some(record) if matches!(record.state, CacheState::Waiting | CacheState::Active) => record,
            Some(record) => {
                return Err(Error::CacheState(format!(
                    "{} is {}, expected waiting",
                    record.namespace, record.state
                )))
            }
            None => {
                return Err(Error::CacheState(format!("{} is not installed", self.namespace())))
            }
        };

        let namespace = self.namespace();
        let mut purged = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == namespace || !entry.file_type().await?.is_dir() {
                continue;
            }
            tokio::fs::remove_dir_all(entry.path()).await?;
            purged.push(name);
        }
        purged.sort();

        record.state = CacheState::Active;
        record.activated_at = Some(Utc::now());
        record.claimed = true;
        write_record(&dir, &record).await?;
        tracing::debug!(namespace = %namespace, purged = purged.len(), "asset cache active");

        Ok(ActivationReport {
            namespace,
            purged,
            claimed: record.claimed,
        })
    }

    /// Install, then activate immediately when `skip_waiting` is set
    pub async fn install_and_activate(&self) -> Result<(InstallReport, Option<ActivationReport>)> {
        let installed = self.install().await?;
        let activated = if self.config.skip_waiting {
            Some(self.activate().await?)
        } else {
            None
        };
        Ok((installed, activated))
    }

    /// Namespace that answers requests: the configured one once it is
    /// active, otherwise the most recently activated one still on disk
    pub async fn serving_namespace(&self) -> Result<Option<String>> {
        let current = self.namespace();
        if self.state().await? == Some(CacheState::Active) {
            return Ok(Some(current));
        }

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut newest: Option<(Option<DateTime<Utc>>, String)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == current
                || name.starts_with(STAGING_PREFIX)
                || !entry.file_type().await?.is_dir()
            {
                continue;
            }
            let record = match read_record(&entry.path()).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(namespace = %name, error = %err, "unreadable cache state");
                    continue;
                }
            };
            if record.state != CacheState::Active {
                continue;
            }
            let newer = newest
                .as_ref()
                .map_or(true, |(activated_at, _)| record.activated_at > *activated_at);
            if newer {
                newest = Some((record.activated_at, name));
            }
        }
        Ok(newest.map(|(_, name)| name))
    }

    /// Cached copy of `url` in the current namespace
    pub async fn lookup(&self, url: &Url) -> Result<Option<AssetResponse>> {
        read_entry(&self.namespace_dir().join(ENTRIES_DIR), url).await
    }

    fn intercepts(&self, request: &AssetRequest) -> bool {
        request.method.eq_ignore_ascii_case("GET")
            && matches!(request.url.scheme(), "http" | "https")
            && request.url.origin() == self.origin.origin()
    }

    /// Answer an outbound request the way the installed cache policy says
    pub async fn handle(&self, request: &AssetRequest) -> Result<FetchOutcome> {
        if !self.intercepts(request) {
            return Ok(FetchOutcome::Passthrough);
        }
        let Some(namespace) = self.serving_namespace().await? else {
            return Ok(FetchOutcome::Passthrough);
        };

        let url = normalize(&request.url);
        let entries = self.root.join(namespace).join(ENTRIES_DIR);
        let cached = read_entry_or_miss(&entries, &url).await;

        let served = match (self.config.policy, cached) {
            (CachePolicy::CacheFirst, Some(response)) => Served {
                response,
                source: ResponseSource::Cache,
                revalidation: None,
            },
            (CachePolicy::StaleWhileRevalidate, Some(response)) => Served {
                response,
                source: ResponseSource::Cache,
                revalidation: Some(self.spawn_revalidation(entries, url)),
            },
            (_, None) => self.from_network(&entries, &url).await?,
        };

        Ok(FetchOutcome::Served(served))
    }

    fn spawn_revalidation(&self, entries: PathBuf, url: Url) -> JoinHandle<()> {
        let network = Arc::clone(&self.network);
        tokio::spawn(async move {
            match network.fetch(&url).await {
                Ok(response) if response.is_ok() => {
                    if let Err(err) = write_entry(&entries, &url, &response).await {
                        tracing::warn!(url = %url, error = %err, "could not refresh cached asset");
                    }
                }
                Ok(response) => {
                    tracing::debug!(url = %url, status = response.status, "revalidation kept cached copy");
                }
                Err(err) => {
                    tracing::debug!(url = %url, error = %err, "revalidation failed; offline?");
                }
            }
        })
    }

    async fn from_network(&self, entries: &Path, url: &Url) -> Result<Served> {
        match self.network.fetch(url).await {
            Ok(response) => {
                if response.is_ok() {
                    if let Err(err) = write_entry(entries, url, &response).await {
                        tracing::warn!(url = %url, error = %err, "could not cache fresh asset");
                    }
                }
                Ok(Served {
                    response,
                    source: ResponseSource::Network,
                    revalidation: None,
                })
            }
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "network fetch failed");
                self.placeholder_for(entries, url).await
            }
        }
    }

    async fn placeholder_for(&self, entries: &Path, url: &Url) -> Result<Served> {
        if is_image(url) {
            if let Some(path) = &self.config.placeholder {
                let placeholder = self.resolve(path)?;
                if let Some(response) = read_entry_or_miss(entries, &placeholder).await {
                    return Ok(Served {
                        response,
                        source: ResponseSource::Placeholder,
                        revalidation: None,
                    });
                }
            }
        }
        Err(Error::Offline(url.to_string()))
    }

    /// Every namespace on disk with its effective state
    ///
    /// An active namespace is reported as superseded only while a different
    /// one is serving.
    pub async fn status(&self) -> Result<Vec<NamespaceStatus>> {
        let current = self.namespace();
        let serving = self.serving_namespace().await?;
        let mut statuses = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(statuses),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(record) = read_record(&dir).await? else {
                continue;
            };
            let is_current = name == current;
            let state = match record.state {
                CacheState::Active if serving.as_deref() != Some(name.as_str()) => {
                    CacheState::Superseded
                }
                state => state,
            };
            statuses.push(NamespaceStatus {
                namespace: name,
                state,
                current: is_current,
                entries: count_entries(&dir).await?,
            });
        }
        statuses.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_detection_uses_extension() {
        assert!(is_image(&Url::parse("http://x/icons/icon-192.png").unwrap()));
        assert!(is_image(&Url::parse("http://x/a.JPG?v=2").unwrap()));
        assert!(!is_image(&Url::parse("http://x/index.html").unwrap()));
        assert!(!is_image(&Url::parse("http://x/").unwrap()));
    }

    #[test]
    fn entry_key_ignores_fragment() {
        let dir = Path::new("/cache");
        let plain = entry_file(dir, &Url::parse("http://x/index.html").unwrap());
        let fragment = entry_file(dir, &Url::parse("http://x/index.html#top").unwrap());
        let query = entry_file(dir, &Url::parse("http://x/index.html?v=1").unwrap());
        assert_eq!(plain, fragment);
        assert_ne!(plain, query);
    }
}
