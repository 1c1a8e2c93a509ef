//! The VFS surface: open, delete, access, path normalization.

use crate::cache::{NopCache, SectorCache};
use crate::changelog::ChangeLogger;
use crate::error::{Result, VfsError};
use crate::file::{AccessFlag, FileHandle, OpenFlags};
use crate::{schema_v1, schema_v2};
use donutdb_core::{COMPRESS_ALG_ZSTD, FILE_META_KEY, FileMeta, LockConfig, VfsConfig};
use donutdb_store::{AttrValue, Condition, ItemKey, KvStore, Update};
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

fn generate_owner_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A SQLite VFS persisting every file into one KV table.
///
/// One `DonutVfs` carries one owner identity for the lifetime of the
/// process; all lock leases it acquires are stamped with it.
pub struct DonutVfs {
    store: Arc<dyn KvStore>,
    owner_id: String,
    config: VfsConfig,
    lock_config: LockConfig,
    change_log: Option<Arc<ChangeLogger>>,
    sector_cache: Arc<dyn SectorCache>,
}

impl DonutVfs {
    /// A VFS with default configuration.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            owner_id: generate_owner_id(),
            config: VfsConfig::default(),
            lock_config: LockConfig::default(),
            change_log: None,
            sector_cache: Arc::new(NopCache),
        }
    }

    /// A VFS with an explicit configuration.
    pub fn with_config(store: Arc<dyn KvStore>, config: VfsConfig) -> Result<Self> {
        config.validate()?;
        let mut vfs = Self::new(store);
        vfs.config = config;
        Ok(vfs)
    }

    /// Override the lock lease timing.
    pub fn lock_config(mut self, lock_config: LockConfig) -> Self {
        self.lock_config = lock_config;
        self
    }

    /// Stream a JSON-lines audit record per operation into `sink`.
    pub fn change_log_writer(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.change_log = Some(Arc::new(ChangeLogger::new(sink)));
        self
    }

    /// Use a content-addressed sector cache for schema v2 files.
    pub fn sector_cache(mut self, cache: Arc<dyn SectorCache>) -> Self {
        self.sector_cache = cache;
        self
    }

    /// The owner id stamped on this process's lock leases.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn meta_key() -> ItemKey {
        ItemKey::new(FILE_META_KEY, 0)
    }

    /// Open `name`, creating it if absent.
    ///
    /// Create-or-get runs in a CAS loop: read the metadata attribute, and
    /// if it is missing write a fresh one guarded by
    /// `attribute_not_exists`. Losing the race means another client created
    /// the file in between; re-read and use theirs. Bounded at 100
    /// attempts, past which a persistent conflict is a bug.
    pub async fn open(&self, name: &str, flags: OpenFlags) -> Result<FileHandle> {
        if let Some(log) = &self.change_log {
            log.start("Open", name, flags.0, 0);
        }
        let result = self.open_inner(name).await;
        if let Some(log) = &self.change_log {
            log.complete("Open", name, 0, result.as_ref().err().map(|e| e.to_string()));
        }
        result
    }

    async fn open_inner(&self, name: &str) -> Result<FileHandle> {
        let meta_key = Self::meta_key();

        for _ in 0..100 {
            let existing = self.store.get_item(&meta_key, Some(&[name]), true).await?;
            if let Some(raw) = existing
                .as_ref()
                .and_then(|item| item.get(name))
                .and_then(|v| v.as_s())
            {
                let meta = FileMeta::from_json(raw)?;
                return self.file_from_meta(&meta);
            }

            let meta = FileMeta::new(
                name,
                self.config.default_schema_version,
                self.config.sector_size,
                COMPRESS_ALG_ZSTD,
            );
            let json = meta.to_json()?;

            match self
                .store
                .update_item(
                    &meta_key,
                    vec![Update::Set(name.to_string(), AttrValue::S(json))],
                    Some(Condition::AttributeNotExists(name.to_string())),
                )
                .await
            {
                Ok(()) => return self.file_from_meta(&meta),
                // We raced with another client, retry.
                Err(err) if err.is_condition_failed() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(VfsError::CreateRace)
    }

    fn file_from_meta(&self, meta: &FileMeta) -> Result<FileHandle> {
        match meta.meta_version {
            0 | 1 => Ok(FileHandle::V1(schema_v1::FileV1::from_meta(
                meta,
                &self.owner_id,
                self.store.clone(),
                self.lock_config.clone(),
                self.change_log.clone(),
            )?)),
            2 => Ok(FileHandle::V2(schema_v2::FileV2::from_meta(
                meta,
                &self.owner_id,
                self.store.clone(),
                self.lock_config.clone(),
                self.change_log.clone(),
                self.sector_cache.clone(),
            )?)),
            other => Err(VfsError::SchemaVersion(other)),
        }
    }

    /// Remove `name` and asynchronously reclaim its sectors.
    ///
    /// The metadata attribute is removed with a CAS on the exact bytes that
    /// were read, then sector cleanup runs in the background. Delete
    /// returns success before cleanup finishes; a cleanup failure only
    /// leaves invisible orphans and is logged, not surfaced.
    pub async fn delete(&self, name: &str, _dir_sync: bool) -> Result<()> {
        if let Some(log) = &self.change_log {
            log.start("Delete", name, 0, 0);
        }
        let result = self.delete_inner(name).await;
        if let Some(log) = &self.change_log {
            log.complete("Delete", name, 0, result.as_ref().err().map(|e| e.to_string()));
        }
        result
    }

    async fn delete_inner(&self, name: &str) -> Result<()> {
        let meta_key = Self::meta_key();

        let existing = self.store.get_item(&meta_key, Some(&[name]), true).await?;
        let Some(raw) = existing
            .as_ref()
            .and_then(|item| item.get(name))
            .and_then(|v| v.as_s())
        else {
            return Ok(());
        };
        let raw = raw.to_string();
        let meta = FileMeta::from_json(&raw)?;

        self.store
            .update_item(
                &meta_key,
                vec![Update::Remove(name.to_string())],
                Some(Condition::AttributeEquals(
                    name.to_string(),
                    AttrValue::S(raw),
                )),
            )
            .await?;

        let store = self.store.clone();
        let cache = self.sector_cache.clone();
        tokio::spawn(async move {
            let result = match meta.meta_version {
                2 => schema_v2::cleanup_sectors(store, cache, &meta).await,
                _ => schema_v1::cleanup_sectors(store, &meta).await,
            };
            if let Err(err) = result {
                warn!(error = %err, file = %meta.orig_name, "async sector cleanup failed");
            }
        });

        Ok(())
    }

    /// Whether `name` exists. Every path is writable, so the read-write
    /// probe is always true.
    pub async fn access(&self, name: &str, flag: AccessFlag) -> Result<bool> {
        let existing = self
            .store
            .get_item(&Self::meta_key(), Some(&[name]), true)
            .await?;
        let exists = existing.is_some_and(|item| item.contains_key(name));

        match flag {
            AccessFlag::Exists => Ok(exists),
            AccessFlag::ReadWrite | AccessFlag::Read => Ok(true),
        }
    }

    /// Normalize `name` to a `/`-rooted, cleaned path.
    pub fn full_pathname(&self, name: &str) -> String {
        donutdb_core::full_pathname(name)
    }
}
