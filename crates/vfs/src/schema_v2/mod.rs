//! Schema v2: content-addressed sectors.
//!
//! Sectors are independent items keyed by `{idx}__{digest}` ids; the
//! per-file metadata row holds the ordered id list and the file size.
//! Sector writes land before the metadata rewrite, so a crash can orphan
//! sectors but never leave the metadata pointing at missing ones.

mod file;
mod iter;
mod sectors;
mod writer;

pub use file::{FileV2, cleanup_sectors};
