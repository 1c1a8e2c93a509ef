//! A SQLite VFS backed by a hash+range KV store.
//!
//! Files are split into fixed-size, zstd-compressed sectors stored as
//! items in a single DynamoDB-semantics table. Two on-store schemas exist:
//! v1 keys each sector by byte offset under a per-file partition, v2 stores
//! content-addressed sectors referenced by the file's metadata row. SQLite's
//! five-level file lock is emulated with a heartbeated lease item per file.
//!
//! The entry point is [`DonutVfs`]; it hands out [`FileHandle`]s
//! implementing the [`VfsFile`] contract the SQL engine drives.

pub mod cache;
pub mod changelog;
pub mod codec;
pub mod error;
pub mod file;
pub mod lock;
pub mod schema_v1;
pub mod schema_v2;
pub mod vfs;

pub use cache::{NopCache, SectorCache};
pub use codec::Codec;
pub use error::{Result, VfsError};
pub use file::{AccessFlag, DeviceCharacteristics, FileHandle, OpenFlags, ReadOutcome, VfsFile};
pub use lock::{GlobalLockManager, LockLevel};
pub use vfs::DonutVfs;
