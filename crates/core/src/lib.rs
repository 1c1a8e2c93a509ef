//! Core domain types and shared logic for DonutDB.
//!
//! This crate defines the canonical data model used across all other crates:
//! - File metadata and the per-file random identifier
//! - Content-addressed sector identity
//! - Configuration for the VFS and the lock lease
//! - Path normalization for the VFS surface
//! - Change-log audit records

pub mod changelog;
pub mod config;
pub mod error;
pub mod meta;
pub mod path;
pub mod sector;

pub use changelog::ChangeRecord;
pub use config::{LockConfig, VfsConfig};
pub use error::{Error, Result};
pub use meta::{FileId, FileMeta};
pub use path::full_pathname;
pub use sector::SectorId;

/// Default sector size: 64 KiB
pub const DEFAULT_SECTOR_SIZE: i64 = 1 << 16;

/// Maximum sector size: 64 KiB
pub const MAX_SECTOR_SIZE: i64 = 1 << 16;

/// Minimum sector size: 512 bytes
pub const MIN_SECTOR_SIZE: i64 = 1 << 9;

/// Hash key of the single metadata row holding every file's metadata.
pub const FILE_META_KEY: &str = "file-meta-v1";

/// Hash-key prefix for schema v1 sector partitions.
pub const FILE_DATA_PREFIX: &str = "file-v1-";

/// Hash-key prefix for schema v2 content-addressed sector items.
pub const FILE_V2_PREFIX: &str = "file-v2-";

/// Hash-key prefix for per-file lock lease items.
pub const FILE_LOCK_PREFIX: &str = "lock-global-v1-";

/// Compression algorithm tag recorded in file metadata.
pub const COMPRESS_ALG_ZSTD: &str = "zstd";
