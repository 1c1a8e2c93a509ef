//! Sector payload compression.
//!
//! Sectors are stored zstd-compressed at the fastest encoder level; the
//! identity mode exists for debugging store contents in place.

use crate::error::Result;
use async_compression::Level;
use async_compression::tokio::write::{ZstdDecoder, ZstdEncoder};
use donutdb_core::COMPRESS_ALG_ZSTD;
use tokio::io::AsyncWriteExt;

/// Compression codec for sector payloads, selected per file from the
/// metadata's `compress_alg` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Zstd,
    Identity,
}

impl Codec {
    /// Resolve a codec from a metadata tag. Unknown tags read as identity.
    pub fn from_tag(tag: &str) -> Self {
        if tag == COMPRESS_ALG_ZSTD {
            Codec::Zstd
        } else {
            Codec::Identity
        }
    }

    /// Compress a sector payload for storage.
    pub async fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::Identity => Ok(data.to_vec()),
            Codec::Zstd => {
                let mut encoder =
                    ZstdEncoder::with_quality(Vec::with_capacity(data.len()), Level::Fastest);
                encoder.write_all(data).await?;
                encoder.shutdown().await?;
                Ok(encoder.into_inner())
            }
        }
    }

    /// Decompress a stored payload. The destination is pre-sized to the
    /// file's sector size, the upper bound for any sector.
    pub async fn decode(&self, data: &[u8], sector_size: i64) -> Result<Vec<u8>> {
        match self {
            Codec::Identity => Ok(data.to_vec()),
            Codec::Zstd => {
                let mut decoder =
                    ZstdDecoder::new(Vec::with_capacity(sector_size.max(0) as usize));
                decoder.write_all(data).await?;
                decoder.shutdown().await?;
                Ok(decoder.into_inner())
            }
        }
    }
}
