//! Buffered sector writer for the content-addressed schema.

use crate::error::{Result, VfsError};
use crate::schema_v2::sectors::{Sector, SectorCtx};
use bytes::Bytes;
use donutdb_core::{FILE_META_KEY, FileMeta, SectorId};
use donutdb_store::{AttrValue, Item, ItemKey, MAX_BATCH_WRITE_ITEMS, Update, WriteOp};
use std::collections::HashMap;

/// Buffers sector puts and deletes and applies them in batches of at most
/// 25 requests, then rewrites the file's metadata row.
///
/// The writer owns the working copy of the file metadata between flushes:
/// `write_sector` grows the sector list and file size in memory, and every
/// successful batch flush persists sectors first, metadata second. A crash
/// between the two leaves orphaned sectors but never a metadata row naming
/// sectors that don't exist.
///
/// Sticky on error: once any flush fails, every subsequent call
/// short-circuits.
pub(crate) struct SectorWriter {
    ctx: SectorCtx,
    pub meta: FileMeta,
    skip_metadata_updates: bool,

    pending_puts: HashMap<usize, Sector>,
    pending_deletes: Vec<SectorId>,
    err: Option<String>,
}

impl SectorWriter {
    pub fn new(ctx: SectorCtx, meta: FileMeta, skip_metadata_updates: bool) -> Self {
        Self {
            ctx,
            meta,
            skip_metadata_updates,
            pending_puts: HashMap::new(),
            pending_deletes: Vec::new(),
            err: None,
        }
    }

    fn check_sticky(&self) -> Result<()> {
        match &self.err {
            Some(msg) => Err(VfsError::WriterPoisoned(msg.clone())),
            None => Ok(()),
        }
    }

    fn poison<T>(&mut self, err: VfsError) -> Result<T> {
        self.err = Some(err.to_string());
        Err(err)
    }

    /// A buffered-but-unflushed sector at `idx`, if any.
    pub fn pending(&self, idx: usize) -> Option<&Sector> {
        self.pending_puts.get(&idx)
    }

    /// Drop buffered puts at or past `idx`. Used by truncate so a doomed
    /// sector is never put and deleted in the same batch.
    pub fn drop_pending_from(&mut self, idx: usize) {
        self.pending_puts.retain(|&i, _| i < idx);
    }

    /// Record `data` as the contents of sector `idx`. Rewrites that produce
    /// the id already recorded at `idx` are suppressed entirely.
    pub async fn write_sector(&mut self, idx: usize, data: Vec<u8>) -> Result<()> {
        self.check_sticky()?;

        let id = SectorId::compute(idx, &data);
        if idx < self.meta.sectors.len() && self.meta.sectors[idx] == id {
            return Ok(());
        }

        let end_pos = idx as i64 * self.ctx.sector_size + data.len() as i64;
        if end_pos > self.meta.file_size {
            self.meta.file_size = end_pos;
        }

        if self.meta.sectors.len() <= idx {
            self.meta.sectors.resize(idx + 1, SectorId::default());
        }
        self.meta.sectors[idx] = id.clone();
        self.pending_puts.insert(idx, Sector { id, data });

        if self.pending_puts.len() + self.pending_deletes.len() == MAX_BATCH_WRITE_ITEMS {
            return self.flush().await;
        }
        Ok(())
    }

    /// Queue the sector item for deletion from the store.
    pub async fn delete_sector(&mut self, id: SectorId) -> Result<()> {
        self.check_sticky()?;

        self.pending_deletes.push(id);
        if self.pending_puts.len() + self.pending_deletes.len() == MAX_BATCH_WRITE_ITEMS {
            return self.flush().await;
        }
        Ok(())
    }

    /// Apply all buffered work: one batch write for the sectors, then the
    /// metadata row rewrite.
    pub async fn flush(&mut self) -> Result<()> {
        self.check_sticky()?;

        if self.pending_puts.is_empty() && self.pending_deletes.is_empty() {
            return Ok(());
        }

        let mut writes = Vec::with_capacity(self.pending_puts.len() + self.pending_deletes.len());
        let mut encode_err = None;
        for sector in self.pending_puts.values() {
            self.ctx
                .cache
                .put(sector.id.as_str(), Bytes::from(sector.data.clone()));

            match self.ctx.codec.encode(&sector.data).await {
                Ok(compressed) => writes.push(WriteOp::Put {
                    key: self.ctx.sector_key(&sector.id),
                    attrs: Item::from([("bytes".to_string(), AttrValue::B(compressed.into()))]),
                }),
                Err(err) => {
                    encode_err = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = encode_err {
            return self.poison(err);
        }

        for id in &self.pending_deletes {
            writes.push(WriteOp::Delete {
                key: self.ctx.sector_key(id),
            });
        }

        let unprocessed = match self.ctx.store.batch_write(writes).await {
            Ok(unprocessed) => unprocessed,
            Err(err) => return self.poison(err.into()),
        };
        if !unprocessed.is_empty() {
            // These should be retried, but until that exists this must be
            // a hard failure.
            return self.poison(VfsError::UnprocessedWrites(unprocessed.len()));
        }

        self.pending_puts.clear();
        self.pending_deletes.clear();

        if !self.skip_metadata_updates {
            if let Err(err) = self.update_meta().await {
                return self.poison(err);
            }
        }
        Ok(())
    }

    async fn update_meta(&self) -> Result<()> {
        let json = self.meta.to_json()?;
        self.ctx
            .store
            .update_item(
                &ItemKey::new(FILE_META_KEY, 0),
                vec![Update::Set(
                    self.meta.orig_name.clone(),
                    AttrValue::S(json),
                )],
                None,
            )
            .await?;
        Ok(())
    }
}
