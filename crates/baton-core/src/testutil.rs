use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use baton_storage::{BlobStore, Result as StoreResult, StoreError};

/// In-memory artifact store for testing. Thread-safe via Mutex. Artifacts
/// keep their member file name so extension-based encryption discovery
/// works like it does against a real store.
pub struct MemoryStore {
    data: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Artifact names currently present, sorted.
    pub fn names(&self) -> Vec<String> {
        let map = self.data.lock().unwrap();
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn raw(&self, name: &str) -> Option<(String, Vec<u8>)> {
        self.data.lock().unwrap().get(name).cloned()
    }

    pub fn insert_raw(&self, name: &str, file_name: &str, data: Vec<u8>) {
        self.data
            .lock()
            .unwrap()
            .insert(name.to_string(), (file_name.to_string(), data));
    }
}

impl BlobStore for MemoryStore {
    fn upload(&self, name: &str, file: &Path, _retention_days: Option<u32>) -> StoreResult<()> {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::Other("no file name".into()))?
            .to_string();
        let data = fs::read(file)?;
        self.data
            .lock()
            .unwrap()
            .insert(name.to_string(), (file_name, data));
        Ok(())
    }

    fn download(&self, name: &str, dest_dir: &Path) -> StoreResult<PathBuf> {
        let map = self.data.lock().unwrap();
        let (file_name, data) = map
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let dest = dest_dir.join(file_name);
        fs::write(&dest, data)?;
        Ok(dest)
    }

    fn delete(&self, name: &str) -> StoreResult<()> {
        self.data.lock().unwrap().remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.data.lock().unwrap().contains_key(name))
    }
}

/// Store wrapper that fails uploads whose artifact name matches a predicate.
/// Delegates everything else to an inner `MemoryStore`.
pub struct FailingStore {
    pub inner: MemoryStore,
    fail_name: String,
}

impl FailingStore {
    pub fn failing_on(fail_name: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_name: fail_name.to_string(),
        }
    }
}

impl BlobStore for FailingStore {
    fn upload(&self, name: &str, file: &Path, retention_days: Option<u32>) -> StoreResult<()> {
        if name == self.fail_name {
            return Err(StoreError::Other(format!("injected failure for {name}")));
        }
        self.inner.upload(name, file, retention_days)
    }
    fn download(&self, name: &str, dest_dir: &Path) -> StoreResult<PathBuf> {
        self.inner.download(name, dest_dir)
    }
    fn delete(&self, name: &str) -> StoreResult<()> {
        self.inner.delete(name)
    }
    fn exists(&self, name: &str) -> StoreResult<bool> {
        self.inner.exists(name)
    }
}

/// Shared log of uploaded artifact names, in upload order.
#[derive(Clone, Default)]
pub struct UploadLog(Arc<Mutex<Vec<String>>>);

impl UploadLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }
}

/// Store wrapper recording the order of uploads.
pub struct RecordingStore {
    inner: MemoryStore,
    log: UploadLog,
}

impl RecordingStore {
    pub fn new() -> (Self, UploadLog) {
        let log = UploadLog::default();
        (
            Self {
                inner: MemoryStore::new(),
                log: log.clone(),
            },
            log,
        )
    }
}

impl BlobStore for RecordingStore {
    fn upload(&self, name: &str, file: &Path, retention_days: Option<u32>) -> StoreResult<()> {
        self.log.record(name);
        self.inner.upload(name, file, retention_days)
    }
    fn download(&self, name: &str, dest_dir: &Path) -> StoreResult<PathBuf> {
        self.inner.download(name, dest_dir)
    }
    fn delete(&self, name: &str) -> StoreResult<()> {
        self.inner.delete(name)
    }
    fn exists(&self, name: &str) -> StoreResult<bool> {
        self.inner.exists(name)
    }
}

/// Write a fixture tree: `(relative path, content)` pairs. Parent
/// directories are created as needed.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
}

/// Snapshot a tree as `relative path → content` for equality assertions.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    collect_tree(root, root, &mut out);
    out
}

fn collect_tree(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if entry.file_type().unwrap().is_dir() {
            collect_tree(root, &path, out);
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(rel, fs::read(&path).unwrap());
        }
    }
}

/// Fast retry settings so failure tests do not sleep.
pub fn fast_retry() -> baton_storage::RetryConfig {
    baton_storage::RetryConfig {
        attempts: 2,
        delay_ms: 0,
    }
}
