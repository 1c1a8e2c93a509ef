//! Content-addressed file operations.

use crate::cache::SectorCache;
use crate::changelog::ChangeLogger;
use crate::codec::Codec;
use crate::error::{Result, VfsError};
use crate::file::{DeviceCharacteristics, ReadOutcome, copy_bytes};
use crate::lock::{GlobalLockManager, LockLevel, validate_transition};
use crate::schema_v2::iter::SectorIter;
use crate::schema_v2::sectors::SectorCtx;
use crate::schema_v2::writer::SectorWriter;
use donutdb_core::{FILE_META_KEY, FileMeta, LockConfig, SectorId};
use donutdb_store::{ItemKey, KvStore};
use std::sync::Arc;
use tracing::warn;

fn ctx_from_meta(
    meta: &FileMeta,
    store: Arc<dyn KvStore>,
    cache: Arc<dyn SectorCache>,
) -> SectorCtx {
    SectorCtx {
        store,
        rand_id: meta.rand_id.clone(),
        raw_name: meta.orig_name.clone(),
        sector_size: meta.sector_size,
        codec: Codec::from_tag(&meta.compress_alg),
        cache,
    }
}

/// A file stored as content-addressed sectors referenced by its metadata
/// row.
pub struct FileV2 {
    ctx: SectorCtx,
    closed: bool,
    cached_size: i64,
    change_log: Option<Arc<ChangeLogger>>,
    writer: Option<SectorWriter>,
    lock_manager: GlobalLockManager,
}

impl FileV2 {
    pub(crate) fn from_meta(
        meta: &FileMeta,
        owner_id: &str,
        store: Arc<dyn KvStore>,
        lock_config: LockConfig,
        change_log: Option<Arc<ChangeLogger>>,
        cache: Arc<dyn SectorCache>,
    ) -> Result<Self> {
        if meta.meta_version != 2 {
            return Err(VfsError::SchemaVersion(meta.meta_version));
        }

        let lock_manager =
            GlobalLockManager::new(store.clone(), &meta.lock_row_key, owner_id, lock_config);

        Ok(Self {
            ctx: ctx_from_meta(meta, store, cache),
            closed: false,
            cached_size: 0,
            change_log,
            writer: None,
            lock_manager,
        })
    }

    fn log_start(&self, action: &str, off: i64) {
        if let Some(log) = &self.change_log {
            log.start(action, &self.ctx.raw_name, 0, off);
        }
    }

    fn log_complete(&self, action: &str, ret_count: i64, err: Option<&VfsError>) {
        if let Some(log) = &self.change_log {
            log.complete(
                action,
                &self.ctx.raw_name,
                ret_count,
                err.map(|e| e.to_string()),
            );
        }
    }

    async fn fetch_meta(&self) -> Result<FileMeta> {
        let name = self.ctx.raw_name.as_str();
        let item = self
            .ctx
            .store
            .get_item(&ItemKey::new(FILE_META_KEY, 0), Some(&[name]), false)
            .await?;
        let raw = item
            .as_ref()
            .and_then(|item| item.get(name))
            .and_then(|v| v.as_s())
            .ok_or_else(|| VfsError::MetaNotFound(name.to_string()))?;
        Ok(FileMeta::from_json(raw)?)
    }

    /// The working metadata: the pending writer's copy when one exists,
    /// otherwise a fresh read from the store.
    async fn current_meta(&self) -> Result<FileMeta> {
        match &self.writer {
            Some(writer) => Ok(writer.meta.clone()),
            None => self.fetch_meta().await,
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let sync_result = self.sync_inner().await;
        let lock_result = self.lock_manager.close().await;
        sync_result?;
        lock_result
    }

    pub async fn read_at(&mut self, buf: &mut [u8], off: i64) -> Result<ReadOutcome> {
        self.log_start("ReadAt", off);
        let result = self.read_at_inner(buf, off).await;
        self.log_complete(
            "ReadAt",
            result.as_ref().map(|o| o.n as i64).unwrap_or(0),
            result.as_ref().err(),
        );
        result
    }

    async fn read_at_inner(&mut self, buf: &mut [u8], off: i64) -> Result<ReadOutcome> {
        if self.closed {
            return Err(VfsError::Closed);
        }

        // Reads bypass pending writer state, so the writer must reach the
        // store first.
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        self.writer = None;

        let sector_size = self.ctx.sector_size;
        let first_idx = (off / sector_size) as usize;
        let meta = self.current_meta().await?;
        let last_byte = off + buf.len() as i64 - 1;
        let mut last_idx = (last_byte / sector_size) as usize + 1;

        if first_idx >= meta.sectors.len() {
            return Ok(ReadOutcome { n: 0, eof: true });
        }
        last_idx = last_idx.min(meta.sectors.len());

        let ids = meta.sectors[first_idx..last_idx].to_vec();
        let mut iter = SectorIter::new(self.ctx.clone(), ids);

        let mut n = 0usize;
        let mut first = true;
        let mut iter_count = 0usize;
        let mut prev_seen_size = sector_size;
        while let Some(sector) = iter.next().await {
            if prev_seen_size != sector_size {
                return Err(VfsError::ShortSector {
                    offset: (first_idx + iter_count - 1) as i64 * sector_size,
                    size: prev_seen_size,
                });
            }
            prev_seen_size = sector.data.len() as i64;

            if first {
                let start = (off % sector_size) as usize;
                n = copy_bytes(buf, sector.data.get(start..).unwrap_or_default());
                first = false;
                iter_count += 1;
                continue;
            }
            n += copy_bytes(&mut buf[n..], &sector.data);
            iter_count += 1;
        }

        match iter.close() {
            Ok(()) => {}
            Err(VfsError::SectorNotFound) if last_byte >= meta.file_size => {
                return Ok(ReadOutcome { n, eof: true });
            }
            Err(err) => return Err(err),
        }

        Ok(ReadOutcome {
            n,
            eof: last_byte >= meta.file_size,
        })
    }

    pub async fn write_at(&mut self, data: &[u8], off: i64) -> Result<usize> {
        self.log_start("WriteAt", off);
        let result = self.write_at_inner(data, off).await;
        self.log_complete(
            "WriteAt",
            result.as_ref().map(|n| *n as i64).unwrap_or(0),
            result.as_ref().err(),
        );
        result
    }

    async fn write_at_inner(&mut self, data: &[u8], off: i64) -> Result<usize> {
        if self.closed {
            return Err(VfsError::Closed);
        }

        let meta = self.current_meta().await?;
        let old_file_size = meta.file_size;

        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => SectorWriter::new(self.ctx.clone(), meta, false),
        };
        let result = Self::write_into(&self.ctx, &mut writer, data, off).await;
        // The writer stays resident (and sticky on error) until sync.
        self.writer = Some(writer);
        let write_count = result?;

        if off + data.len() as i64 > old_file_size {
            self.cached_size = off + data.len() as i64;
        }
        Ok(write_count)
    }

    async fn write_into(
        ctx: &SectorCtx,
        writer: &mut SectorWriter,
        data: &[u8],
        off: i64,
    ) -> Result<usize> {
        let sector_size = ctx.sector_size;
        let first_idx = (off / sector_size) as usize;

        if first_idx >= writer.meta.sectors.len() {
            if writer.meta.file_size % sector_size != 0 && !writer.meta.sectors.is_empty() {
                // The last sector is not full; fetch it and right-pad so
                // the gap up to the write target reads as zeros.
                let idx = writer.meta.sectors.len() - 1;
                let mut sector_data = match writer.pending(idx) {
                    Some(sector) => sector.data.clone(),
                    None => {
                        let id = writer.meta.sectors[idx].clone();
                        ctx.get_sector(&id).await?.data
                    }
                };
                if (sector_data.len() as i64) < sector_size {
                    sector_data.resize(sector_size as usize, 0);
                    writer.write_sector(idx, sector_data).await?;
                }
            }

            for idx in writer.meta.sectors.len()..first_idx {
                writer
                    .write_sector(idx, vec![0; sector_size as usize])
                    .await?;
            }
        }

        let mut pos = off;
        let mut remaining = data;
        let mut write_count = 0usize;
        while !remaining.is_empty() {
            let mut take = sector_size as usize;
            if pos % sector_size != 0 {
                take = (sector_size - pos % sector_size) as usize;
            }
            take = take.min(remaining.len());

            let chunk = &remaining[..take];
            let off_in_sector = (pos % sector_size) as usize;
            let idx = (pos / sector_size) as usize;

            if take != sector_size as usize {
                // Partial sector: merge the chunk into the existing bytes.
                let mut existing = if let Some(pending) = writer.pending(idx) {
                    pending.data.clone()
                } else if idx >= writer.meta.sectors.len() {
                    Vec::new()
                } else {
                    let id = writer.meta.sectors[idx].clone();
                    ctx.get_sector(&id).await?.data
                };
                if existing.len() < off_in_sector + take {
                    existing.resize(off_in_sector + take, 0);
                }
                existing[off_in_sector..off_in_sector + take].copy_from_slice(chunk);
                writer.write_sector(idx, existing).await?;
            } else {
                writer.write_sector(idx, chunk.to_vec()).await?;
            }

            write_count += take;
            pos += take as i64;
            remaining = &remaining[take..];
        }

        Ok(write_count)
    }

    pub async fn truncate(&mut self, size: i64) -> Result<()> {
        self.log_start("Trunc", size);
        let result = self.truncate_inner(size).await;
        self.log_complete("Trunc", 0, result.as_ref().err());
        result
    }

    async fn truncate_inner(&mut self, size: i64) -> Result<()> {
        if self.closed {
            return Err(VfsError::Closed);
        }

        let meta = self.current_meta().await?;
        if size >= meta.file_size {
            return Ok(());
        }

        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => SectorWriter::new(self.ctx.clone(), meta, false),
        };
        let result = Self::truncate_into(&self.ctx, &mut writer, size).await;
        // The shrink stays pending until sync flushes it.
        self.writer = Some(writer);
        result
    }

    async fn truncate_into(ctx: &SectorCtx, writer: &mut SectorWriter, size: i64) -> Result<()> {
        let sector_size = ctx.sector_size;
        let first_idx = (size / sector_size) as usize;
        let mut first_idx_to_delete = first_idx;

        if size % sector_size != 0 {
            first_idx_to_delete += 1;

            let mut data = match writer.pending(first_idx) {
                Some(sector) => sector.data.clone(),
                None => {
                    let id = writer.meta.sectors[first_idx].clone();
                    ctx.get_sector(&id).await?.data
                }
            };
            data.truncate((size % sector_size) as usize);
            writer.write_sector(first_idx, data).await?;
        }

        let doomed: Vec<SectorId> = writer
            .meta
            .sectors
            .get(first_idx_to_delete..)
            .unwrap_or_default()
            .to_vec();

        // Shrink the working metadata before queueing deletes so an
        // auto-flush mid-loop can never persist references to sectors the
        // same batch removes.
        writer.meta.sectors.truncate(first_idx_to_delete);
        writer.meta.file_size = size;
        writer.drop_pending_from(first_idx_to_delete);

        for id in doomed {
            writer.delete_sector(id).await?;
        }
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<()> {
        self.log_start("Sync", 0);
        let result = self.sync_inner().await;
        self.log_complete("Sync", 0, result.as_ref().err());
        result
    }

    async fn sync_inner(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        self.writer = None;
        Ok(())
    }

    pub async fn file_size(&mut self) -> Result<i64> {
        self.log_start("FileSize", 0);
        let result = self.file_size_inner().await;
        self.log_complete(
            "FileSize",
            *result.as_ref().unwrap_or(&0),
            result.as_ref().err(),
        );
        result
    }

    async fn file_size_inner(&mut self) -> Result<i64> {
        let meta = self.current_meta().await?;
        let size = meta.file_size;

        if size > self.cached_size {
            self.cached_size = size;
        } else if size < self.cached_size {
            warn!(
                real = size,
                cached = self.cached_size,
                file = %self.ctx.raw_name,
                "filesize smaller than cached watermark"
            );
        }

        Ok(size)
    }

    pub async fn lock(&mut self, level: LockLevel) -> Result<()> {
        self.log_start("Lock", 0);
        let result = self.lock_inner(level).await;
        self.log_complete("Lock", 0, result.as_ref().err());
        result
    }

    async fn lock_inner(&mut self, level: LockLevel) -> Result<()> {
        let cur = self.lock_manager.level();
        if level <= cur {
            return Ok(());
        }
        validate_transition(cur, level)?;
        self.lock_manager.lock(level).await
    }

    pub async fn unlock(&mut self, level: LockLevel) -> Result<()> {
        self.log_start("Unlock", 0);
        let result = self.lock_manager.unlock(level).await;
        self.log_complete("Unlock", 0, result.as_ref().err());
        result
    }

    pub async fn check_reserved_lock(&mut self) -> Result<bool> {
        self.log_start("CheckReservedLock", 0);
        let result = self.lock_manager.check_reserved_lock().await;
        self.log_complete(
            "CheckReservedLock",
            i64::from(*result.as_ref().unwrap_or(&false)),
            result.as_ref().err(),
        );
        result
    }

    pub fn sector_size(&self) -> i64 {
        self.ctx.sector_size
    }

    pub fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::for_sector_size(self.ctx.sector_size)
    }

    /// Enumerate every sector and verify the summed lengths match the
    /// recorded file size. Test helper.
    pub async fn sanity_check_sectors(&mut self) -> Result<()> {
        let meta = self.current_meta().await?;

        let mut iter = SectorIter::new(self.ctx.clone(), meta.sectors.clone());
        let mut seen = 0i64;
        while let Some(sector) = iter.next().await {
            seen += sector.data.len() as i64;
        }
        iter.close()?;

        if seen != meta.file_size {
            return Err(VfsError::ShortSector {
                offset: seen,
                size: meta.file_size,
            });
        }
        Ok(())
    }
}

/// Delete every sector the metadata references. Used by the VFS after the
/// metadata attribute is removed, so metadata updates are skipped.
pub async fn cleanup_sectors(
    store: Arc<dyn KvStore>,
    cache: Arc<dyn SectorCache>,
    meta: &FileMeta,
) -> Result<()> {
    let ctx = ctx_from_meta(meta, store, cache);
    let mut writer = SectorWriter::new(ctx, meta.clone(), true);

    for id in meta.sectors.clone() {
        writer.delete_sector(id).await?;
    }
    writer.flush().await
}
