#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use url::Url;

use td::asset_cache::{AssetResponse, Network};
use td::blob::BlobStore;
use td::error::{Error, Result};
use td::lifecycle::TaskService;
use td::storage::{FileSlotStore, SlotStore, Storage};
use td::task::RecordStore;

pub const TASK_KEY: &str = "td_tasks_v5";

/// A data directory in a tempdir, laid out like the CLI's
pub struct TestDir {
    dir: TempDir,
    storage: Storage,
}

impl TestDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let storage = Storage::new(dir.path());
        storage.init().expect("init storage");
        Self { dir, storage }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn slots(&self, quota: u64) -> FileSlotStore {
        FileSlotStore::new(self.storage.slots_dir(), quota)
    }

    pub fn write_slot(&self, key: &str, value: &str) {
        self.slots(u64::MAX).set(key, value).expect("write slot");
    }

    pub fn read_slot(&self, key: &str) -> Option<String> {
        self.slots(u64::MAX).get(key).expect("read slot")
    }

    pub fn records(&self) -> RecordStore {
        RecordStore::load(Box::new(self.slots(u64::MAX)), TASK_KEY)
    }

    pub fn blobs(&self) -> Arc<BlobStore> {
        Arc::new(BlobStore::new(self.storage.blobs_dir(), "images", 1024 * 1024))
    }

    pub fn service(&self) -> TaskService {
        TaskService::new(self.records(), self.blobs())
    }

    pub fn blob_file(&self, blob_id: &str) -> PathBuf {
        self.storage
            .blobs_dir()
            .join("images")
            .join(format!("{blob_id}.blob"))
    }
}

/// Scripted network: fixed responses per URL, switchable offline
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, AssetResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, content_type: &str, body: &[u8]) {
        self.routes
            .lock()
            .insert(url.to_string(), AssetResponse::ok(Some(content_type), body));
    }

    pub fn serve_status(&self, url: &str, status: u16) {
        self.routes.lock().insert(
            url.to_string(),
            AssetResponse {
                status,
                content_type: None,
                body: Vec::new(),
            },
        );
    }

    pub fn forget(&self, url: &str) {
        self.routes.lock().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, url: &Url) -> Result<AssetResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::OperationFailed(format!("offline: {url}")));
        }
        self.routes
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Error::OperationFailed(format!("no route for {url}")))
    }
}

/// Smallest valid PNG header, enough for MIME sniffing
pub fn png_bytes() -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0]
}
