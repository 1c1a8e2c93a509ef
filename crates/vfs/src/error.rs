//! VFS error types.

use donutdb_store::StoreError;
use thiserror::Error;

/// VFS and file operation errors.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The file handle was used after close.
    #[error("file handle is closed")]
    Closed,

    /// The lock is held by another owner. The SQL engine retries on this.
    #[error("database is locked")]
    Busy,

    /// A sector the store should hold is absent. Collapses to EOF when the
    /// read region extends past the file size; otherwise it indicates
    /// corruption.
    #[error("sector not found")]
    SectorNotFound,

    /// Sector enumeration returned an offset that breaks contiguity.
    #[error(
        "unexpected sector offset for range {first}-{last}, prev={prev} got={got} expected={expected}"
    )]
    SectorGap {
        first: i64,
        last: i64,
        prev: i64,
        got: i64,
        expected: i64,
    },

    /// A non-terminal sector came back shorter than the sector size.
    #[error("non-full sector detected in the middle of a file offset={offset} size={size}")]
    ShortSector { offset: i64, size: i64 },

    #[error("invalid lock transition: {0}")]
    InvalidLockTransition(&'static str),

    /// The heartbeat task observed an error releasing the lease, or the
    /// lock manager was used after close.
    #[error("lock manager error: {0}")]
    Lock(String),

    /// The store reported unprocessed batch-write requests.
    #[error("unprocessed items remained after batch write: {0}")]
    UnprocessedWrites(usize),

    /// A sector writer short-circuits every call after its first failure.
    #[error("sector writer poisoned by earlier error: {0}")]
    WriterPoisoned(String),

    #[error("failed to get/create file metadata too many times due to races")]
    CreateRace,

    #[error("cannot instantiate a file for meta_version={0}")]
    SchemaVersion(u32),

    #[error("file metadata not found for {0}")]
    MetaNotFound(String),

    #[error("sector item has no bytes attribute")]
    MissingBytes,

    #[error(transparent)]
    Core(#[from] donutdb_core::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),
}

impl VfsError {
    /// Whether this error means the lock is held elsewhere.
    pub fn is_busy(&self) -> bool {
        matches!(self, VfsError::Busy)
    }
}

/// Result type for VFS operations.
pub type Result<T> = std::result::Result<T, VfsError>;
