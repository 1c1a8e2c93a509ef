//! Buffered sector writer for the offset-keyed schema.

use crate::error::{Result, VfsError};
use crate::schema_v1::sectors::{Sector, SectorStore};
use donutdb_store::{AttrValue, Item, WriteOp};
use donutdb_store::MAX_BATCH_WRITE_ITEMS;

/// Buffers sector puts and deletes and applies them in batches of at most
/// 25 requests.
///
/// `flush` is mandatory before the writer is dropped. The writer is sticky
/// on error: once any flush fails, every subsequent call short-circuits, so
/// no partial file state is observable downstream.
pub(crate) struct SectorWriter {
    sectors: SectorStore,

    pending_puts: Vec<Sector>,
    pending_deletes: Vec<i64>,
    err: Option<String>,
}

impl SectorWriter {
    pub fn new(sectors: SectorStore) -> Self {
        Self {
            sectors,
            pending_puts: Vec::new(),
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

    pub async fn write_sector(&mut self, sector: Sector) -> Result<()> {
        self.check_sticky()?;

        self.pending_puts.push(sector);
        if self.pending_puts.len() + self.pending_deletes.len() == MAX_BATCH_WRITE_ITEMS {
            return self.flush().await;
        }
        Ok(())
    }

    pub async fn delete_sector(&mut self, sector_offset: i64) -> Result<()> {
        self.check_sticky()?;

        self.pending_deletes.push(sector_offset);
        if self.pending_puts.len() + self.pending_deletes.len() == MAX_BATCH_WRITE_ITEMS {
            return self.flush().await;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.check_sticky()?;

        if self.pending_puts.is_empty() && self.pending_deletes.is_empty() {
            return Ok(());
        }

        let mut writes = Vec::with_capacity(self.pending_puts.len() + self.pending_deletes.len());
        for sector in &self.pending_puts {
            let compressed = match self.sectors.codec.encode(&sector.data).await {
                Ok(compressed) => compressed,
                Err(err) => return self.poison(err),
            };
            writes.push(WriteOp::Put {
                key: self.sectors.sector_key(sector.offset),
                attrs: Item::from([("bytes".to_string(), AttrValue::B(compressed.into()))]),
            });
        }
        for offset in &self.pending_deletes {
            writes.push(WriteOp::Delete {
                key: self.sectors.sector_key(*offset),
            });
        }

        let unprocessed = match self.sectors.store.batch_write(writes).await {
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
        Ok(())
    }
}
