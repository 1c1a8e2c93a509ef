//! Sector fetch paths for the offset-keyed schema.

use crate::codec::Codec;
use crate::error::{Result, VfsError};
use donutdb_store::{ItemKey, KvStore, QueryRequest, RangeCond};
use std::sync::Arc;

/// One sector of an offset-keyed file.
#[derive(Clone, Debug)]
pub(crate) struct Sector {
    pub offset: i64,
    pub data: Vec<u8>,
}

/// Read/write context for one file's sector partition.
#[derive(Clone)]
pub(crate) struct SectorStore {
    pub store: Arc<dyn KvStore>,
    pub data_row_key: String,
    pub sector_size: i64,
    pub codec: Codec,
}

impl SectorStore {
    /// Fetch the sector at `sector_offset`.
    pub async fn get_sector(&self, sector_offset: i64) -> Result<Sector> {
        let page = self
            .store
            .query(
                QueryRequest::partition(&self.data_row_key)
                    .range(RangeCond::Eq(sector_offset))
                    .projection(&["bytes"])
                    .limit(1),
            )
            .await?;

        let Some(item) = page.items.into_iter().next() else {
            return Err(VfsError::SectorNotFound);
        };
        let compressed = item
            .get("bytes")
            .and_then(|v| v.as_b())
            .ok_or(VfsError::MissingBytes)?;
        let data = self.codec.decode(compressed, self.sector_size).await?;

        Ok(Sector {
            offset: sector_offset,
            data,
        })
    }

    /// Fetch the sector with the greatest offset, from which the file size
    /// derives.
    pub async fn get_last_sector(&self) -> Result<Sector> {
        let page = self
            .store
            .query(
                QueryRequest::partition(&self.data_row_key)
                    .projection(&["range_key", "bytes"])
                    .scan_forward(false)
                    .limit(1),
            )
            .await?;

        let Some(item) = page.items.into_iter().next() else {
            return Err(VfsError::SectorNotFound);
        };
        let offset = item
            .get("range_key")
            .and_then(|v| v.as_n())
            .ok_or(VfsError::MissingBytes)?;
        let compressed = item
            .get("bytes")
            .and_then(|v| v.as_b())
            .ok_or(VfsError::MissingBytes)?;
        let data = self.codec.decode(compressed, self.sector_size).await?;

        Ok(Sector { offset, data })
    }

    /// Fetch every sector in `[first_offset, last_offset]`, enforcing
    /// contiguity: each returned offset must be exactly one sector size
    /// past the previous one.
    pub async fn get_sector_range(
        &self,
        first_offset: i64,
        last_offset: i64,
    ) -> Result<Vec<Sector>> {
        if first_offset == last_offset {
            return Ok(vec![self.get_sector(first_offset).await?]);
        }

        let mut sectors: Vec<Sector> = Vec::new();
        let mut start = first_offset;
        let mut prev_offset = first_offset - self.sector_size;

        loop {
            let page = self
                .store
                .query(
                    QueryRequest::partition(&self.data_row_key)
                        .range(RangeCond::Between(start, last_offset))
                        .projection(&["range_key", "bytes"])
                        .limit(1000),
                )
                .await?;

            let page_len = page.items.len();
            for item in page.items {
                let offset = item
                    .get("range_key")
                    .and_then(|v| v.as_n())
                    .ok_or(VfsError::MissingBytes)?;
                if offset != prev_offset + self.sector_size {
                    return Err(VfsError::SectorGap {
                        first: first_offset,
                        last: last_offset,
                        prev: prev_offset,
                        got: offset,
                        expected: prev_offset + self.sector_size,
                    });
                }

                let compressed = item
                    .get("bytes")
                    .and_then(|v| v.as_b())
                    .ok_or(VfsError::MissingBytes)?;
                let data = self.codec.decode(compressed, self.sector_size).await?;
                sectors.push(Sector { offset, data });
                prev_offset = offset;
            }

            if page_len == 0 {
                break;
            }
            match sectors.last() {
                Some(end) if end.offset == last_offset => break,
                Some(end) => start = end.offset + 1,
                None => break,
            }
        }

        Ok(sectors)
    }

    /// Key of the sector item at `offset`.
    pub fn sector_key(&self, offset: i64) -> ItemKey {
        ItemKey::new(self.data_row_key.clone(), offset)
    }
}
