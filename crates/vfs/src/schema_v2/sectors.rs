//! Sector fetch paths for the content-addressed schema.

use crate::cache::SectorCache;
use crate::codec::Codec;
use crate::error::{Result, VfsError};
use donutdb_core::{FILE_V2_PREFIX, SectorId};
use donutdb_store::{ItemKey, KvStore, MAX_BATCH_GET_ITEMS};
use std::collections::HashMap;
use std::sync::Arc;

/// One sector of a content-addressed file.
#[derive(Clone, Debug)]
pub(crate) struct Sector {
    pub id: SectorId,
    pub data: Vec<u8>,
}

/// Read/write context shared by the file, its writer, and its iterators.
#[derive(Clone)]
pub(crate) struct SectorCtx {
    pub store: Arc<dyn KvStore>,
    pub rand_id: String,
    pub raw_name: String,
    pub sector_size: i64,
    pub codec: Codec,
    pub cache: Arc<dyn SectorCache>,
}

impl SectorCtx {
    /// Key of the sector item for `id`.
    pub fn sector_key(&self, id: &SectorId) -> ItemKey {
        ItemKey::new(
            format!("{FILE_V2_PREFIX}{}-{}-{id}", self.rand_id, self.raw_name),
            0,
        )
    }

    /// Batch-fetch sectors by id, preserving order. Missing sectors come
    /// back as `None`. Unprocessed keys are retried until the store drains
    /// them.
    pub async fn get_sectors(&self, ids: &[SectorId]) -> Result<Vec<Option<Sector>>> {
        let mut found: HashMap<String, Vec<u8>> = HashMap::new();

        let mut keys: Vec<ItemKey> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(data) = self.cache.get(id.as_str()) {
                found.insert(id.as_str().to_string(), data.to_vec());
            } else {
                keys.push(self.sector_key(id));
            }
        }

        while !keys.is_empty() {
            let batch: Vec<ItemKey> = keys
                .drain(..keys.len().min(MAX_BATCH_GET_ITEMS))
                .collect();
            let (items, unprocessed) = self
                .store
                .batch_get(batch, Some(&["bytes", "hash_key"]))
                .await?;

            for item in items {
                let full_key = item
                    .get("hash_key")
                    .and_then(|v| v.as_s())
                    .ok_or(VfsError::MissingBytes)?;
                // The sector id is the final `-`-separated component; ids
                // themselves never contain a dash.
                let sector_id = full_key.rsplit('-').next().unwrap_or_default().to_string();

                let compressed = item
                    .get("bytes")
                    .and_then(|v| v.as_b())
                    .ok_or(VfsError::MissingBytes)?;
                let data = self.codec.decode(compressed, self.sector_size).await?;
                found.insert(sector_id, data);
            }

            keys.extend(unprocessed);
        }

        Ok(ids
            .iter()
            .map(|id| {
                found.get(id.as_str()).map(|data| Sector {
                    id: id.clone(),
                    data: data.clone(),
                })
            })
            .collect())
    }

    /// Fetch a single sector that must exist.
    pub async fn get_sector(&self, id: &SectorId) -> Result<Sector> {
        self.get_sectors(std::slice::from_ref(id))
            .await?
            .into_iter()
            .next()
            .flatten()
            .ok_or(VfsError::SectorNotFound)
    }
}
