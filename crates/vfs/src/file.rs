//! The file contract exposed to the SQL engine, and the schema dispatch.

use crate::error::Result;
use crate::lock::LockLevel;
use crate::schema_v1::FileV1;
use crate::schema_v2::FileV2;
use async_trait::async_trait;
use std::ops::BitOr;

/// Result of a positional read: bytes copied into the buffer, and whether
/// the requested range reached or passed the end of the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOutcome {
    pub n: usize,
    pub eof: bool,
}

/// Flags passed to `open`. Carried for the change log; the store layer
/// treats every file the same way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READONLY: OpenFlags = OpenFlags(0x1);
    pub const READWRITE: OpenFlags = OpenFlags(0x2);
    pub const CREATE: OpenFlags = OpenFlags(0x4);
    pub const MAIN_DB: OpenFlags = OpenFlags(0x100);
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// The probe kinds `access` answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessFlag {
    Exists,
    ReadWrite,
    Read,
}

/// SQLite I/O-capability flags advertised by `device_characteristics`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCharacteristics(pub u32);

impl DeviceCharacteristics {
    pub const ATOMIC_512: DeviceCharacteristics = DeviceCharacteristics(0x2);
    pub const ATOMIC_1K: DeviceCharacteristics = DeviceCharacteristics(0x4);
    pub const ATOMIC_2K: DeviceCharacteristics = DeviceCharacteristics(0x8);
    pub const ATOMIC_4K: DeviceCharacteristics = DeviceCharacteristics(0x10);
    pub const ATOMIC_8K: DeviceCharacteristics = DeviceCharacteristics(0x20);
    pub const ATOMIC_16K: DeviceCharacteristics = DeviceCharacteristics(0x40);
    pub const ATOMIC_32K: DeviceCharacteristics = DeviceCharacteristics(0x80);
    pub const ATOMIC_64K: DeviceCharacteristics = DeviceCharacteristics(0x100);
    pub const SAFE_APPEND: DeviceCharacteristics = DeviceCharacteristics(0x200);
    pub const SEQUENTIAL: DeviceCharacteristics = DeviceCharacteristics(0x400);

    pub fn contains(&self, other: DeviceCharacteristics) -> bool {
        self.0 & other.0 == other.0
    }

    /// Base flags plus the atomic-write flag matching `sector_size`.
    pub(crate) fn for_sector_size(sector_size: i64) -> DeviceCharacteristics {
        let base = DeviceCharacteristics::SAFE_APPEND | DeviceCharacteristics::SEQUENTIAL;
        let atomic = match sector_size {
            0x200 => DeviceCharacteristics::ATOMIC_512,
            0x400 => DeviceCharacteristics::ATOMIC_1K,
            0x800 => DeviceCharacteristics::ATOMIC_2K,
            0x1000 => DeviceCharacteristics::ATOMIC_4K,
            0x2000 => DeviceCharacteristics::ATOMIC_8K,
            0x4000 => DeviceCharacteristics::ATOMIC_16K,
            0x8000 => DeviceCharacteristics::ATOMIC_32K,
            0x10000 => DeviceCharacteristics::ATOMIC_64K,
            _ => DeviceCharacteristics::default(),
        };
        base | atomic
    }
}

impl BitOr for DeviceCharacteristics {
    type Output = DeviceCharacteristics;

    fn bitor(self, rhs: DeviceCharacteristics) -> DeviceCharacteristics {
        DeviceCharacteristics(self.0 | rhs.0)
    }
}

/// The file operations SQLite's VFS layer expects.
#[async_trait]
pub trait VfsFile: Send {
    /// Flush pending state and shut down the lock manager. Safe to call
    /// more than once; every I/O operation after the first close fails
    /// with `Closed`.
    async fn close(&mut self) -> Result<()>;

    /// Read up to `buf.len()` bytes at byte offset `off`.
    async fn read_at(&mut self, buf: &mut [u8], off: i64) -> Result<ReadOutcome>;

    /// Write `data` at byte offset `off`, zero-filling any gap past the
    /// current end of file. Returns the bytes placed into sectors.
    async fn write_at(&mut self, data: &[u8], off: i64) -> Result<usize>;

    /// Shrink the file to `size` bytes. Growing is a no-op.
    async fn truncate(&mut self, size: i64) -> Result<()>;

    /// Durability point: all buffered sector and metadata state reaches the
    /// store before this returns.
    async fn sync(&mut self) -> Result<()>;

    /// Current file size in bytes.
    async fn file_size(&mut self) -> Result<i64>;

    async fn lock(&mut self, level: LockLevel) -> Result<()>;

    async fn unlock(&mut self, level: LockLevel) -> Result<()>;

    async fn check_reserved_lock(&mut self) -> Result<bool>;

    fn sector_size(&self) -> i64;

    fn device_characteristics(&self) -> DeviceCharacteristics;
}

/// A file handle dispatching to its on-store schema.
pub enum FileHandle {
    V1(FileV1),
    V2(FileV2),
}

macro_rules! dispatch {
    ($self:ident, $file:ident => $call:expr) => {
        match $self {
            FileHandle::V1($file) => $call,
            FileHandle::V2($file) => $call,
        }
    };
}

#[async_trait]
impl VfsFile for FileHandle {
    async fn close(&mut self) -> Result<()> {
        dispatch!(self, f => f.close().await)
    }

    async fn read_at(&mut self, buf: &mut [u8], off: i64) -> Result<ReadOutcome> {
        dispatch!(self, f => f.read_at(buf, off).await)
    }

    async fn write_at(&mut self, data: &[u8], off: i64) -> Result<usize> {
        dispatch!(self, f => f.write_at(data, off).await)
    }

    async fn truncate(&mut self, size: i64) -> Result<()> {
        dispatch!(self, f => f.truncate(size).await)
    }

    async fn sync(&mut self) -> Result<()> {
        dispatch!(self, f => f.sync().await)
    }

    async fn file_size(&mut self) -> Result<i64> {
        dispatch!(self, f => f.file_size().await)
    }

    async fn lock(&mut self, level: LockLevel) -> Result<()> {
        dispatch!(self, f => f.lock(level).await)
    }

    async fn unlock(&mut self, level: LockLevel) -> Result<()> {
        dispatch!(self, f => f.unlock(level).await)
    }

    async fn check_reserved_lock(&mut self) -> Result<bool> {
        dispatch!(self, f => f.check_reserved_lock().await)
    }

    fn sector_size(&self) -> i64 {
        dispatch!(self, f => f.sector_size())
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        dispatch!(self, f => f.device_characteristics())
    }
}

/// Copy as many bytes as fit, returning the count.
pub(crate) fn copy_bytes(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_characteristics_match_sector_size() {
        let c = DeviceCharacteristics::for_sector_size(65536);
        assert!(c.contains(DeviceCharacteristics::SAFE_APPEND));
        assert!(c.contains(DeviceCharacteristics::SEQUENTIAL));
        assert!(c.contains(DeviceCharacteristics::ATOMIC_64K));
        assert!(!c.contains(DeviceCharacteristics::ATOMIC_512));

        let c = DeviceCharacteristics::for_sector_size(512);
        assert!(c.contains(DeviceCharacteristics::ATOMIC_512));
        assert!(!c.contains(DeviceCharacteristics::ATOMIC_64K));
    }

    #[test]
    fn test_copy_bytes_caps_at_shorter_side() {
        let mut dst = [0u8; 4];
        assert_eq!(copy_bytes(&mut dst, b"abcdef"), 4);
        assert_eq!(&dst, b"abcd");

        let mut dst = [0u8; 8];
        assert_eq!(copy_bytes(&mut dst, b"ab"), 2);
        assert_eq!(&dst[..2], b"ab");
    }
}
