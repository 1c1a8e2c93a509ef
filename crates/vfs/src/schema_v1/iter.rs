//! One-shot forward iteration over a contiguous sector range.

use crate::error::{Result, VfsError};
use crate::schema_v1::sectors::{Sector, SectorStore};
use std::collections::VecDeque;

/// Lazy forward enumeration of the sectors in `[offset, last_offset]`.
///
/// One-shot: [`close`](SectorIter::close) is mandatory and returns the
/// first error observed. Terminating before `last_offset` without data left
/// in the range reads as [`VfsError::SectorNotFound`].
pub(crate) struct SectorIter {
    sectors: SectorStore,
    last_offset: i64,

    offset: i64,
    cached: VecDeque<Sector>,
    err: Option<VfsError>,
}

impl SectorIter {
    pub fn new(sectors: SectorStore, first_offset: i64, last_offset: i64) -> Self {
        Self {
            sectors,
            last_offset,
            offset: first_offset,
            cached: VecDeque::new(),
            err: None,
        }
    }

    /// The next sector in order, or `None` once the range is exhausted or
    /// an error is pending for [`close`](SectorIter::close).
    pub async fn next(&mut self) -> Option<Sector> {
        if self.err.is_some() {
            return None;
        }

        if self.offset > self.last_offset {
            return None;
        }

        if self.cached.is_empty() {
            let fetched = match self
                .sectors
                .get_sector_range(self.offset, self.last_offset)
                .await
            {
                Ok(fetched) => fetched,
                Err(err) => {
                    self.err = Some(err);
                    return None;
                }
            };

            if fetched.is_empty() {
                if self.offset < self.last_offset {
                    self.err = Some(VfsError::SectorNotFound);
                }
                return None;
            }
            self.cached = fetched.into();
        }

        let sector = self.cached.pop_front()?;
        self.offset = sector.offset + self.sectors.sector_size;
        Some(sector)
    }

    /// Consume the iterator, surfacing the first error it hit.
    pub fn close(self) -> Result<()> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
