//! Offset-keyed file operations.

use crate::changelog::ChangeLogger;
use crate::codec::Codec;
use crate::error::{Result, VfsError};
use crate::file::{DeviceCharacteristics, ReadOutcome, copy_bytes};
use crate::lock::{GlobalLockManager, LockLevel, validate_transition};
use crate::schema_v1::iter::SectorIter;
use crate::schema_v1::sectors::{Sector, SectorStore};
use crate::schema_v1::writer::SectorWriter;
use donutdb_core::{FILE_DATA_PREFIX, FileMeta, LockConfig};
use donutdb_store::KvStore;
use std::sync::Arc;
use tracing::warn;

fn data_row_key(meta: &FileMeta) -> String {
    format!("{FILE_DATA_PREFIX}{}-{}", meta.rand_id, meta.orig_name)
}

/// A file stored as offset-keyed sectors under one partition key.
pub struct FileV1 {
    sectors: SectorStore,
    raw_name: String,
    closed: bool,
    cached_size: i64,
    change_log: Option<Arc<ChangeLogger>>,
    lock_manager: GlobalLockManager,
}

impl FileV1 {
    pub(crate) fn from_meta(
        meta: &FileMeta,
        owner_id: &str,
        store: Arc<dyn KvStore>,
        lock_config: LockConfig,
        change_log: Option<Arc<ChangeLogger>>,
    ) -> Result<Self> {
        if meta.meta_version > 1 {
            return Err(VfsError::SchemaVersion(meta.meta_version));
        }

        let sectors = SectorStore {
            store: store.clone(),
            data_row_key: data_row_key(meta),
            sector_size: meta.sector_size,
            codec: Codec::from_tag(&meta.compress_alg),
        };
        let lock_manager =
            GlobalLockManager::new(store, &meta.lock_row_key, owner_id, lock_config);

        Ok(Self {
            sectors,
            raw_name: meta.orig_name.clone(),
            closed: false,
            cached_size: 0,
            change_log,
            lock_manager,
        })
    }

    fn sector_for_pos(&self, pos: i64) -> i64 {
        pos - (pos % self.sectors.sector_size)
    }

    fn log_start(&self, action: &str, off: i64) {
        if let Some(log) = &self.change_log {
            log.start(action, &self.raw_name, 0, off);
        }
    }

    fn log_complete(&self, action: &str, ret_count: i64, err: Option<&VfsError>) {
        if let Some(log) = &self.change_log {
            log.complete(action, &self.raw_name, ret_count, err.map(|e| e.to_string()));
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.lock_manager.close().await
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

        let sector_size = self.sectors.sector_size;
        let first_sector = self.sector_for_pos(off);
        let file_size = self.file_size_inner().await?;
        let last_byte = off + buf.len() as i64 - 1;
        let last_sector = self.sector_for_pos(last_byte);

        let mut iter = SectorIter::new(self.sectors.clone(), first_sector, last_sector);

        let mut n = 0usize;
        let mut first = true;
        let mut prev_seen_size = sector_size;
        let mut prev_seen_offset = 0i64;
        while let Some(sector) = iter.next().await {
            if prev_seen_size != sector_size {
                return Err(VfsError::ShortSector {
                    offset: prev_seen_offset,
                    size: prev_seen_size,
                });
            }
            prev_seen_size = sector.data.len() as i64;
            prev_seen_offset = sector.offset;

            if first {
                let start = (off % sector_size) as usize;
                n = copy_bytes(buf, sector.data.get(start..).unwrap_or_default());
                first = false;
                continue;
            }
            n += copy_bytes(&mut buf[n..], &sector.data);
        }

        match iter.close() {
            Ok(()) => {}
            Err(VfsError::SectorNotFound) if last_byte >= file_size => {
                return Ok(ReadOutcome { n, eof: true });
            }
            Err(err) => return Err(err),
        }

        Ok(ReadOutcome {
            n,
            eof: last_byte >= file_size,
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

        let sector_size = self.sectors.sector_size;
        let old_file_size = self.file_size_inner().await?;
        let first_sector = self.sector_for_pos(off);
        let old_last_sector = self.sector_for_pos(old_file_size);
        let end = off + data.len() as i64;
        let last_sector_offset = end - (end % sector_size);

        let mut writer = SectorWriter::new(self.sectors.clone());

        // Writing past the end of the file: every sector between the old
        // last sector and the write target must exist and be full before
        // the merge phase runs.
        let mut sector_start = old_last_sector;
        while sector_start < last_sector_offset {
            let sector_last_byte = sector_start + sector_size - 1;
            if old_file_size <= sector_start {
                writer
                    .write_sector(Sector {
                        offset: sector_start,
                        data: vec![0; sector_size as usize],
                    })
                    .await?;
            } else if old_file_size < sector_last_byte {
                // Right-pad the existing partial sector.
                let mut sector = self.sectors.get_sector(sector_start).await?;
                sector.data.resize(sector_size as usize, 0);
                writer.write_sector(sector).await?;
            }
            // Otherwise the sector is already full.
            sector_start += sector_size;
        }

        writer.flush().await?;

        // Merge phase: fold the new bytes into each covered sector.
        let mut iter = Some(SectorIter::new(
            self.sectors.clone(),
            first_sector,
            last_sector_offset,
        ));

        let mut remaining = data;
        let mut write_count = 0usize;
        let mut idx = 0usize;
        let mut sec = first_sector;
        while sec <= last_sector_offset {
            let fetched = match iter.as_mut() {
                Some(it) => match it.next().await {
                    Some(sector) => Some(sector),
                    None => {
                        match iter.take().map(SectorIter::close) {
                            Some(Err(VfsError::SectorNotFound)) if sec == last_sector_offset => {}
                            Some(Err(err)) => return Err(err),
                            _ => {}
                        }
                        None
                    }
                },
                None => None,
            };
            let mut sector = fetched.unwrap_or(Sector {
                offset: sec,
                data: Vec::new(),
            });

            let offset_into_sector = if idx == 0 {
                (off % sector_size) as usize
            } else {
                0
            };

            if sector.offset < last_sector_offset && (sector.data.len() as i64) < sector_size {
                sector.data.resize(sector_size as usize, 0);
            } else if sector.offset == last_sector_offset
                && sector.data.len() < offset_into_sector + remaining.len()
            {
                sector.data.resize(offset_into_sector + remaining.len(), 0);
            }

            let n = copy_bytes(&mut sector.data[offset_into_sector..], remaining);
            remaining = &remaining[n..];

            writer.write_sector(sector).await?;
            write_count += n;
            idx += 1;
            sec += sector_size;
        }

        if let Some(it) = iter.take() {
            it.close()?;
        }

        writer.flush().await?;

        if off + data.len() as i64 > old_file_size {
            self.cached_size = off + data.len() as i64;
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

        let sector_size = self.sectors.sector_size;
        let file_size = self.file_size_inner().await?;
        if size >= file_size {
            return Ok(());
        }

        let first_sector = self.sector_for_pos(size);
        let mut sector = self.sectors.get_sector(first_sector).await?;
        sector.data.truncate((size % sector_size) as usize);

        let mut writer = SectorWriter::new(self.sectors.clone());
        writer.write_sector(sector).await?;

        let last_sector = self.sector_for_pos(file_size);
        let mut doomed = first_sector + sector_size;
        while doomed <= last_sector {
            writer.delete_sector(doomed).await?;
            doomed += sector_size;
        }

        writer.flush().await
    }

    pub async fn sync(&mut self) -> Result<()> {
        self.log_start("Sync", 0);
        // Every write path flushes before returning; nothing is pending.
        self.log_complete("Sync", 0, None);
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
        let size = match self.sectors.get_last_sector().await {
            Ok(sector) => sector.offset + sector.data.len() as i64,
            Err(VfsError::SectorNotFound) => 0,
            Err(err) => return Err(err),
        };

        if size > self.cached_size {
            self.cached_size = size;
        } else if size < self.cached_size {
            warn!(
                real = size,
                cached = self.cached_size,
                file = %self.raw_name,
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
        self.sectors.sector_size
    }

    pub fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::for_sector_size(self.sectors.sector_size)
    }

    /// Walk every sector from offset zero and verify the layout invariants
    /// hold. Test helper.
    pub async fn sanity_check_sectors(&mut self) -> Result<()> {
        let sector_size = self.sectors.sector_size;
        let file_size = self.file_size_inner().await?;
        let last_sector = self.sector_for_pos(file_size);

        let mut iter = SectorIter::new(self.sectors.clone(), 0, last_sector);
        let mut n = 0i64;
        while let Some(sector) = iter.next().await {
            let expected = n * sector_size;
            if sector.offset != expected {
                return Err(VfsError::SectorGap {
                    first: 0,
                    last: last_sector,
                    prev: (n - 1) * sector_size,
                    got: sector.offset,
                    expected,
                });
            }
            n += 1;
        }
        iter.close()?;

        if (n - 1) * sector_size != last_sector {
            return Err(VfsError::SectorNotFound);
        }
        Ok(())
    }
}

/// Delete every sector of a v1 file, walking down from the last offset.
/// Used by the VFS after the metadata attribute is removed.
pub async fn cleanup_sectors(store: Arc<dyn KvStore>, meta: &FileMeta) -> Result<()> {
    let sectors = SectorStore {
        store,
        data_row_key: data_row_key(meta),
        sector_size: meta.sector_size,
        codec: Codec::from_tag(&meta.compress_alg),
    };

    let last = match sectors.get_last_sector().await {
        Ok(last) => last,
        Err(VfsError::SectorNotFound) => return Ok(()),
        Err(err) => return Err(err),
    };

    let sector_size = sectors.sector_size;
    let mut writer = SectorWriter::new(sectors);
    let mut offset = last.offset;
    while offset >= 0 {
        writer.delete_sector(offset).await?;
        offset -= sector_size;
    }
    writer.flush().await
}
