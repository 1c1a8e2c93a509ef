//! File metadata stored in the file-meta row.
//!
//! A single KV item at `(file-meta-v1, 0)` maps each live file name to a
//! JSON blob of [`FileMeta`]. The blob carries everything needed to open
//! the file again: schema version, sector size, the random id the row keys
//! are derived from, and (for schema v2) the ordered sector list and cached
//! file size.

use crate::error::{Error, Result};
use crate::sector::SectorId;
use crate::{FILE_DATA_PREFIX, FILE_LOCK_PREFIX, FILE_V2_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Random per-file identifier: 20 bytes, base64-url encoded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        use base64::Engine;
        use rand::RngCore;
        let mut bytes = [0u8; 20];
        rand::rng().fill_bytes(&mut bytes);
        Self(base64::engine::general_purpose::URL_SAFE.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// Per-file metadata blob, one per file name in the metadata row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMeta {
    pub meta_version: u32,
    pub sector_size: i64,
    pub orig_name: String,
    pub rand_id: String,
    pub data_row_key: String,
    pub lock_row_key: String,
    pub compress_alg: String,

    // v2 only fields
    #[serde(default)]
    pub file_size: i64,
    #[serde(default)]
    pub sectors: Vec<SectorId>,
}

impl FileMeta {
    /// Build metadata for a brand-new file, generating its random id and
    /// deriving the row keys.
    pub fn new(name: &str, meta_version: u32, sector_size: i64, compress_alg: &str) -> Self {
        let rand_id = FileId::generate();
        Self {
            meta_version,
            sector_size,
            orig_name: name.to_string(),
            rand_id: rand_id.as_str().to_string(),
            data_row_key: format!("{FILE_DATA_PREFIX}{}-{name}", rand_id.as_str()),
            lock_row_key: format!("{FILE_LOCK_PREFIX}{}-{name}", rand_id.as_str()),
            compress_alg: compress_alg.to_string(),
            file_size: 0,
            sectors: Vec::new(),
        }
    }

    /// Hash key of a schema v2 sector item for this file.
    pub fn v2_sector_key(&self, id: &SectorId) -> String {
        format!("{FILE_V2_PREFIX}{}-{}-{id}", self.rand_id, self.orig_name)
    }

    /// Parse a metadata blob from its stored JSON form.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MetaDecode(e.to_string()))
    }

    /// Serialize to the stored JSON form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MetaEncode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_is_base64_url_of_20_bytes() {
        use base64::Engine;
        let id = FileId::generate();
        let decoded = base64::engine::general_purpose::URL_SAFE
            .decode(id.as_str())
            .unwrap();
        assert_eq!(decoded.len(), 20);

        let other = FileId::generate();
        assert_ne!(id, other);
    }

    #[test]
    fn test_meta_row_keys() {
        let meta = FileMeta::new("test.db", 2, 65536, "zstd");
        assert!(meta.data_row_key.starts_with("file-v1-"));
        assert!(meta.data_row_key.ends_with("-test.db"));
        assert!(meta.lock_row_key.starts_with("lock-global-v1-"));
        assert!(meta.lock_row_key.ends_with("-test.db"));

        let id = SectorId::compute(0, b"data");
        let key = meta.v2_sector_key(&id);
        assert!(key.starts_with("file-v2-"));
        assert!(key.ends_with(&format!("-{}", id.as_str())));
    }

    #[test]
    fn test_meta_json_round_trip() {
        let mut meta = FileMeta::new("a.db", 2, 4096, "zstd");
        meta.file_size = 8192;
        meta.sectors = vec![
            SectorId::compute(0, b"first"),
            SectorId::compute(1, b"second"),
        ];

        let json = meta.to_json().unwrap();
        let parsed = FileMeta::from_json(&json).unwrap();
        assert_eq!(parsed.orig_name, "a.db");
        assert_eq!(parsed.sector_size, 4096);
        assert_eq!(parsed.file_size, 8192);
        assert_eq!(parsed.sectors, meta.sectors);
    }

    #[test]
    fn test_meta_json_defaults_v2_fields() {
        // Rows written by a v1-only writer carry no file_size/sectors.
        let raw = r#"{"meta_version":1,"sector_size":65536,"orig_name":"x.db",
            "rand_id":"abc","data_row_key":"file-v1-abc-x.db",
            "lock_row_key":"lock-global-v1-abc-x.db","compress_alg":"zstd"}"#;
        let meta = FileMeta::from_json(raw).unwrap();
        assert_eq!(meta.file_size, 0);
        assert!(meta.sectors.is_empty());
    }
}
