//! Store error types.

use thiserror::Error;

/// Store operation errors.
///
/// `ConditionFailed` must stay distinguishable from every other variant:
/// the lock manager maps it to busy, and the VFS open path retries on it.
/// Everything else is surfaced to the caller verbatim.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("batch of {0} requests exceeds the per-call limit")]
    BatchTooLarge(usize),

    #[error("item is missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("malformed item: {0}")]
    MalformedItem(String),

    #[error("store error: {0}")]
    Service(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Whether this error is a failed conditional write (a lost CAS race).
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StoreError::ConditionFailed)
    }

    /// Wrap an opaque backend error.
    pub fn service<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Service(Box::new(err))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
