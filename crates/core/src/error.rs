//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sector size: {size} (must be a power of two between {min} and {max})")]
    InvalidSectorSize { size: i64, min: i64, max: i64 },

    #[error("invalid schema version: {0} (must be 1 or 2)")]
    InvalidSchemaVersion(u32),

    #[error("invalid sector id: {0}")]
    InvalidSectorId(String),

    #[error("decode file metadata err: {0}")]
    MetaDecode(String),

    #[error("encode file metadata err: {0}")]
    MetaEncode(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
