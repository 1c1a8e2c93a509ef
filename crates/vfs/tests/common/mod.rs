//! Shared fixtures for VFS integration tests.

use donutdb_core::{FILE_META_KEY, FileMeta, LockConfig, VfsConfig};
use donutdb_store::{ItemKey, KvStore, MemoryBackend};
use donutdb_vfs::DonutVfs;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Lease timing shrunk so lock tests finish quickly.
pub fn fast_lock_config() -> LockConfig {
    LockConfig {
        lease_duration_ms: 400,
        renew_interval_ms: 100,
    }
}

/// A VFS over the given store creating files with `schema_version`.
pub fn vfs_with(store: Arc<MemoryBackend>, schema_version: u32) -> DonutVfs {
    let config = VfsConfig {
        default_schema_version: schema_version,
        ..Default::default()
    };
    DonutVfs::with_config(store, config)
        .unwrap()
        .lock_config(fast_lock_config())
}

/// Read a file's metadata straight from the store.
pub async fn read_meta(store: &MemoryBackend, name: &str) -> FileMeta {
    let item = store
        .get_item(&ItemKey::new(FILE_META_KEY, 0), Some(&[name]), true)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no metadata row for {name}"));
    let raw = item
        .get(name)
        .and_then(|v| v.as_s())
        .unwrap_or_else(|| panic!("no metadata attribute for {name}"));
    FileMeta::from_json(raw).unwrap()
}

/// Whether the metadata attribute for `name` exists.
pub async fn meta_exists(store: &MemoryBackend, name: &str) -> bool {
    store
        .get_item(&ItemKey::new(FILE_META_KEY, 0), Some(&[name]), true)
        .await
        .unwrap()
        .is_some_and(|item| item.contains_key(name))
}

/// Random payload of `len` bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

/// A `Write` sink capturing everything for later inspection.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
