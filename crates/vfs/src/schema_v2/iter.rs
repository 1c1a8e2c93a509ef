//! One-shot iteration over a slice of sector ids.

use crate::error::{Result, VfsError};
use crate::schema_v2::sectors::{Sector, SectorCtx};
use donutdb_core::SectorId;
use donutdb_store::MAX_BATCH_GET_ITEMS;
use std::collections::VecDeque;

/// Yields the named sectors in order, batch-fetching 100 ids at a time.
///
/// One-shot: [`close`](SectorIter::close) is mandatory and returns the
/// first error observed. A missing id reads as
/// [`VfsError::SectorNotFound`].
pub(crate) struct SectorIter {
    ctx: SectorCtx,
    to_fetch: VecDeque<SectorId>,
    cached: VecDeque<Option<Sector>>,
    err: Option<VfsError>,
}

impl SectorIter {
    pub fn new(ctx: SectorCtx, ids: Vec<SectorId>) -> Self {
        Self {
            ctx,
            to_fetch: ids.into(),
            cached: VecDeque::new(),
            err: None,
        }
    }

    /// The next sector in order, or `None` once the ids are exhausted or an
    /// error is pending for [`close`](SectorIter::close).
    pub async fn next(&mut self) -> Option<Sector> {
        if self.err.is_some() {
            return None;
        }

        if self.cached.is_empty() && self.to_fetch.is_empty() {
            return None;
        }

        if self.cached.is_empty() {
            let batch: Vec<SectorId> = self
                .to_fetch
                .drain(..self.to_fetch.len().min(MAX_BATCH_GET_ITEMS))
                .collect();
            match self.ctx.get_sectors(&batch).await {
                Ok(sectors) => self.cached = sectors.into(),
                Err(err) => {
                    self.err = Some(err);
                    return None;
                }
            }
        }

        match self.cached.pop_front()? {
            Some(sector) => Some(sector),
            None => {
                self.err = Some(VfsError::SectorNotFound);
                None
            }
        }
    }

    /// Consume the iterator, surfacing the first error it hit.
    pub fn close(self) -> Result<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
