//! Attachment blob store.
//!
//! Images live as `<root>/<container>/<uuid>.blob`. A write lands in a temp
//! file, is flushed, then renamed into place; `save_image` only returns the
//! id after the rename, so a returned id is always readable.
//!
//! Reads hand out [`BlobLease`]s: revocable references that keep the bytes
//! alive in the store's lease registry until [`BlobStore::release`] is
//! called, even if the entry is deleted in the meantime.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::{BlobStage, Error, Result};
use crate::lock;

/// On-disk container layout version
pub const BLOB_DB_VERSION: u32 = 1;

const VERSION_FILE: &str = "VERSION";
const BLOB_EXTENSION: &str = "blob";
const LEASE_SCHEME: &str = "blob:td/";

/// Guess the MIME type from magic bytes
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

/// Revocable reference to blob bytes
#[derive(Debug, Clone)]
pub struct BlobLease {
    url: String,
    blob_id: String,
    mime: &'static str,
    data: Arc<[u8]>,
}

impl BlobLease {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn blob_id(&self) -> &str {
        &self.blob_id
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outstanding leases keyed by URL
#[derive(Debug, Default)]
struct LeaseRegistry {
    leases: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl LeaseRegistry {
    fn acquire(&self, blob_id: &str, data: Vec<u8>) -> BlobLease {
        let url = format!("{LEASE_SCHEME}{}", Uuid::new_v4());
        let data: Arc<[u8]> = Arc::from(data);
        self.leases.lock().insert(url.clone(), Arc::clone(&data));
        BlobLease {
            url,
            blob_id: blob_id.to_string(),
            mime: sniff_mime(&data),
            data,
        }
    }

    fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.leases.lock().get(url).cloned()
    }

    fn release(&self, url: &str) -> bool {
        self.leases.lock().remove(url).is_some()
    }

    fn outstanding(&self) -> usize {
        self.leases.lock().len()
    }
}

/// Opened container handle, shared by every caller of `open`
#[derive(Debug)]
struct BlobContainer {
    dir: PathBuf,
    usage: AtomicU64,
}

impl BlobContainer {
    fn open_blocking(root: &Path, container: &str) -> Result<Self> {
        let setup = |err: std::io::Error| Error::blob(BlobStage::Setup, err.to_string());

        std::fs::create_dir_all(root).map_err(setup)?;
        let version_path = root.join(VERSION_FILE);
        let on_disk = match std::fs::read_to_string(&version_path) {
            Ok(raw) => raw.trim().parse::<u32>().map_err(|_| {
                Error::blob(BlobStage::Setup, format!("unreadable {VERSION_FILE}: {raw:?}"))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => return Err(setup(err)),
        };

        if on_disk > BLOB_DB_VERSION {
            return Err(Error::blob(
                BlobStage::Setup,
                format!("container version {on_disk} is newer than supported {BLOB_DB_VERSION}"),
            ));
        }

        let dir = root.join(container);
        if on_disk < BLOB_DB_VERSION || !dir.exists() {
            tracing::debug!(from = on_disk, to = BLOB_DB_VERSION, "upgrading blob container");
            std::fs::create_dir_all(&dir).map_err(setup)?;
            lock::write_atomic(&version_path, BLOB_DB_VERSION.to_string().as_bytes())
                .map_err(|err| Error::blob(BlobStage::Setup, err.to_string()))?;
        }

        let mut usage = 0;
        for entry in std::fs::read_dir(&dir).map_err(setup)? {
            let entry = entry.map_err(setup)?;
            if is_blob_file(&entry.path()) {
                usage += entry.metadata().map_err(setup)?.len();
            }
        }

        Ok(Self {
            dir,
            usage: AtomicU64::new(usage),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{BLOB_EXTENSION}"))
    }
}

fn is_blob_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXTENSION)
}

/// Only canonical UUIDs name entries; anything else cannot exist
fn canonical_id(id: &str) -> Option<String> {
    Uuid::parse_str(id.trim()).ok().map(|uuid| uuid.to_string())
}

#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    container: String,
    size_limit: u64,
    quota_bytes: Option<u64>,
    handle: OnceCell<Arc<BlobContainer>>,
    leases: LeaseRegistry,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, container: impl Into<String>, size_limit: u64) -> Self {
        Self {
            root: root.into(),
            container: container.into(),
            size_limit,
            quota_bytes: None,
            handle: OnceCell::new(),
            leases: LeaseRegistry::default(),
        }
    }

    /// Cap the total bytes the container may hold
    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Open (creating or upgrading) the container; later calls reuse it
    pub async fn open(&self) -> Result<()> {
        self.container().await.map(|_| ())
    }

    async fn container(&self) -> Result<Arc<BlobContainer>> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let root = self.root.clone();
                let container = self.container.clone();
                let opened = tokio::task::spawn_blocking(move || {
                    BlobContainer::open_blocking(&root, &container)
                })
                .await
                .map_err(|err| Error::blob(BlobStage::Setup, err.to_string()))??;
                Ok::<_, Error>(Arc::new(opened))
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Store image bytes under a fresh id, returning once they are durable
    pub async fn save_image(&self, bytes: &[u8]) -> Result<String> {
        let size = bytes.len() as u64;
        if size > self.size_limit {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.size_limit,
            });
        }

        let container = self.container().await?;
        if let Some(quota) = self.quota_bytes {
            let needed = container.usage.load(Ordering::SeqCst) + size;
            if needed > quota {
                return Err(Error::blob(
                    BlobStage::Write,
                    format!("quota exceeded: {needed} bytes needed, quota is {quota} bytes"),
                ));
            }
        }

        let id = Uuid::new_v4().to_string();
        let path = container.path_for(&id);
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || lock::write_atomic(&path, &data))
            .await
            .map_err(|err| Error::blob(BlobStage::Write, err.to_string()))?
            .map_err(|err| Error::blob(BlobStage::Write, err.to_string()))?;

        container.usage.fetch_add(size, Ordering::SeqCst);
        tracing::debug!(id = %id, size, "image stored");
        Ok(id)
    }

    /// Lease the bytes for `id`, or `None` when there is no such entry
    pub async fn get_image(&self, id: &str) -> Result<Option<BlobLease>> {
        let Some(id) = canonical_id(id) else {
            return Ok(None);
        };
        let container = self.container().await?;
        match tokio::fs::read(container.path_for(&id)).await {
            Ok(data) => Ok(Some(self.leases.acquire(&id, data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::blob(BlobStage::Read, err.to_string())),
        }
    }

    /// True when an entry exists for `id`
    pub async fn contains(&self, id: &str) -> Result<bool> {
        let Some(id) = canonical_id(id) else {
            return Ok(false);
        };
        let container = self.container().await?;
        tokio::fs::try_exists(container.path_for(&id))
            .await
            .map_err(|err| Error::blob(BlobStage::Read, err.to_string()))
    }

    /// Delete an entry; deleting a missing entry is a no-op
    pub async fn delete_image(&self, id: &str) -> Result<()> {
        let Some(id) = canonical_id(id) else {
            return Ok(());
        };
        let container = self.container().await?;
        let path = container.path_for(&id);
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(Error::blob(BlobStage::Delete, err.to_string())),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                container.usage.fetch_sub(size, Ordering::SeqCst);
                tracing::debug!(id = %id, "image deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::blob(BlobStage::Delete, err.to_string())),
        }
    }

    /// Ids of every stored entry
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let container = self.container().await?;
        let mut entries = tokio::fs::read_dir(&container.dir)
            .await
            .map_err(|err| Error::blob(BlobStage::Read, err.to_string()))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| Error::blob(BlobStage::Read, err.to_string()))?
        {
            let path = entry.path();
            if !is_blob_file(&path) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(canonical_id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete every entry, returning how many were removed
    pub async fn clear(&self) -> Result<usize> {
        let ids = self.list_ids().await?;
        for id in &ids {
            self.delete_image(id).await?;
        }
        Ok(ids.len())
    }

    /// Bytes currently held by the container
    pub async fn usage(&self) -> Result<u64> {
        Ok(self.container().await?.usage.load(Ordering::SeqCst))
    }

    /// Bytes behind a lease URL, while the lease is outstanding
    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.leases.resolve(url)
    }

    /// Give a lease back; returns false if it was already released
    pub fn release(&self, lease: &BlobLease) -> bool {
        self.leases.release(&lease.url)
    }

    pub fn outstanding_leases(&self) -> usize {
        self.leases.outstanding()
    }
}
