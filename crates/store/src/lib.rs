//! KV store abstraction for DonutDB.
//!
//! The rest of the system consumes a narrow slice of DynamoDB's API through
//! the [`KvStore`] trait: single-item reads and conditional writes, range
//! queries over the sort key, and bounded batch operations. Two backends
//! ship here: [`DynamoBackend`] over the AWS SDK and [`MemoryBackend`], a
//! faithful in-process emulation used by tests and local tooling.

pub mod backends;
pub mod error;
pub mod traits;
pub mod types;

pub use backends::dynamo::DynamoBackend;
pub use backends::memory::MemoryBackend;
pub use error::{StoreError, StoreResult};
pub use traits::KvStore;
pub use types::{
    AttrValue, Condition, Item, ItemKey, QueryPage, QueryRequest, RangeCond, Update, WriteOp,
};

/// Hash (partition) key attribute name of the table.
pub const HASH_KEY: &str = "hash_key";

/// Range (sort) key attribute name of the table.
pub const RANGE_KEY: &str = "range_key";

/// DynamoDB's hard limit on requests per BatchWriteItem call.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// DynamoDB's hard limit on keys per BatchGetItem call.
pub const MAX_BATCH_GET_ITEMS: usize = 100;
