//! Storage layer for td
//!
//! Everything td persists lives under one data directory:
//!
//! ```text
//! <data>/
//!   .td.toml                      # Configuration
//!   slots/                        # Synchronous key -> text store
//!     .lock                       # Held across quota check + write
//!     <key>.json                  # One slot per key (task records live in one)
//!   blobs/                        # Attachment container (see `blob`)
//!     VERSION
//!     <container>/<uuid>.blob
//!   cache/                        # Asset cache namespaces (see `asset_cache`)
//!     <prefix>-<version>/
//! ```
//!
//! The slot store mirrors a browser key-value text store: synchronous,
//! whole-value writes, and a byte quota shared by every slot. Writing past
//! the quota fails with [`Error::StorageQuotaExceeded`] and leaves the
//! previous value in place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

/// Name of the configuration file inside the data directory
pub const CONFIG_FILE: &str = ".td.toml";

/// Default slot quota, matching the usual browser allowance
pub const DEFAULT_SLOT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

const SLOTS_DIR: &str = "slots";
const BLOBS_DIR: &str = "blobs";
const CACHE_DIR: &str = "cache";
const SLOT_EXTENSION: &str = "json";
const SLOT_LOCK: &str = ".lock";

/// Directory layout for td state
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data directory: explicit path, else the platform data dir
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        let dirs = directories::ProjectDirs::from("", "", "td").ok_or_else(|| {
            Error::InvalidArgument("no home directory; pass --dir or set TD_DIR".to_string())
        })?;
        Ok(Self::new(dirs.data_dir()))
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.root.join(SLOTS_DIR)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the directory skeleton
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.slots_dir())?;
        fs::create_dir_all(self.blobs_dir())?;
        fs::create_dir_all(self.cache_dir())?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.slots_dir().exists()
    }
}

/// Synchronous key -> text store
///
/// Implementations must leave the previous value untouched when `set` fails.
pub trait SlotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("invalid slot key '{key}'")))
    }
}

/// Slot store backed by one file per key
#[derive(Debug, Clone)]
pub struct FileSlotStore {
    dir: PathBuf,
    quota_bytes: u64,
}

impl FileSlotStore {
    pub fn new(dir: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            quota_bytes,
        }
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{SLOT_EXTENSION}"))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(SLOT_LOCK)
    }

    /// Bytes used by every slot except `skip`
    fn usage_excluding(&self, skip: &Path) -> Result<u64> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == skip || path.extension().and_then(|e| e.to_str()) != Some(SLOT_EXTENSION) {
                continue;
            }
            total += entry.metadata()?.len();
        }
        Ok(total)
    }

    /// Total bytes currently stored across slots
    pub fn usage(&self) -> Result<u64> {
        self.usage_excluding(Path::new(""))
    }
}

impl SlotStore for FileSlotStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        match fs::read_to_string(self.slot_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir)?;
        let _lock = FileLock::acquire(self.lock_path(), DEFAULT_LOCK_TIMEOUT_MS)?;

        let path = self.slot_path(key);
        let needed = self.usage_excluding(&path)? + value.len() as u64;
        if needed > self.quota_bytes {
            return Err(Error::StorageQuotaExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }

        lock::write_atomic(&path, value.as_bytes())
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let _lock = FileLock::acquire(self.lock_path(), DEFAULT_LOCK_TIMEOUT_MS)?;
        match fs::remove_file(self.slot_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process slot store, used by tests and embedders without a disk
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    slots: Mutex<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Raw slot contents, bypassing the quota
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.slots.lock().insert(key.to_string(), value.to_string());
    }
}

impl SlotStore for MemorySlotStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut slots = self.slots.lock();
        if let Some(quota) = self.quota_bytes {
            let others: u64 = slots
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(_, v)| v.len() as u64)
                .sum();
            let needed = others + value.len() as u64;
            if needed > quota {
                return Err(Error::StorageQuotaExceeded { needed, quota });
            }
        }
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.slots.lock().remove(key);
        Ok(())
    }
}
