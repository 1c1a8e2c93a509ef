//! Offset-keyed (schema v1) file behavior.

mod common;

use common::{random_bytes, read_meta, vfs_with};
use donutdb_store::{AttrValue, Item, ItemKey, KvStore, MemoryBackend};
use donutdb_vfs::{Codec, FileHandle, OpenFlags, VfsError, VfsFile};
use std::sync::Arc;

const S: i64 = 65536;

async fn open_v1(store: &Arc<MemoryBackend>, name: &str) -> FileHandle {
    vfs_with(store.clone(), 1)
        .open(name, OpenFlags::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_basic_write_read() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "basic.db").await;

    let n = f.write_at(b"rustic-grouped", 0).await.unwrap();
    assert_eq!(n, 14);
    assert_eq!(f.file_size().await.unwrap(), 14);

    let mut buf = vec![0u8; 1024];
    let out = f.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(out.n, 14);
    assert!(out.eof);
    assert_eq!(&buf[..14], b"rustic-grouped");

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_offset_write_zero_fills_gap() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "offset.db").await;

    let n = f.write_at(b"rustic-grouped", 32).await.unwrap();
    assert_eq!(n, 14);
    assert_eq!(f.file_size().await.unwrap(), 46);

    let mut buf = vec![0u8; 1024];
    let out = f.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(out.n, 46);
    assert!(out.eof);
    assert_eq!(&buf[..32], &[0u8; 32]);
    assert_eq!(&buf[32..46], b"rustic-grouped");

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_cross_sector_grow() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "grow.db").await;

    f.write_at(&[1], 0).await.unwrap();
    let payload = random_bytes(10);
    f.write_at(&payload, 2 * S).await.unwrap();
    assert_eq!(f.file_size().await.unwrap(), 2 * S + 10);

    // Three sector items: full, zero-filled, short terminal.
    let meta = read_meta(&store, "grow.db").await;
    assert_eq!(store.count_hash_prefix(&meta.data_row_key), 3);

    let mut buf = vec![0u8; (2 * S + 10) as usize];
    let out = f.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(out.n as i64, 2 * S + 10);
    assert_eq!(buf[0], 1);
    assert!(buf[1..(2 * S) as usize].iter().all(|b| *b == 0));
    assert_eq!(&buf[(2 * S) as usize..], &payload[..]);

    if let FileHandle::V1(inner) = &mut f {
        inner.sanity_check_sectors().await.unwrap();
    }

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_large_sparse_write_and_truncate() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "sparse.db").await;

    let payload = random_bytes(1_549_516);
    let off = 305_204i64;
    let n = f.write_at(&payload, off).await.unwrap();
    assert_eq!(n, payload.len());
    assert_eq!(f.file_size().await.unwrap(), 1_854_720);

    let mut buf = vec![0u8; payload.len()];
    let out = f.read_at(&mut buf, off).await.unwrap();
    assert_eq!(out.n, payload.len());
    assert_eq!(buf, payload);

    // The gap before the write reads as zeros.
    let mut gap = vec![0xffu8; off as usize];
    let out = f.read_at(&mut gap, 0).await.unwrap();
    assert_eq!(out.n as i64, off);
    assert!(gap.iter().all(|b| *b == 0));

    let new_size = off + 3_679;
    f.truncate(new_size).await.unwrap();
    assert_eq!(f.file_size().await.unwrap(), 308_883);

    let mut past = vec![0u8; 64];
    let out = f.read_at(&mut past, new_size).await.unwrap();
    assert!(out.eof);

    if let FileHandle::V1(inner) = &mut f {
        inner.sanity_check_sectors().await.unwrap();
    }

    // Terminal sector carries the remainder.
    let meta = read_meta(&store, "sparse.db").await;
    let expected_sectors = (new_size / S + 1) as usize;
    assert_eq!(store.count_hash_prefix(&meta.data_row_key), expected_sectors);

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_overwrite_middle_of_file() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "overwrite.db").await;

    let original = random_bytes(3 * S as usize);
    f.write_at(&original, 0).await.unwrap();

    let patch = random_bytes(1000);
    let patch_off = S + 123;
    f.write_at(&patch, patch_off).await.unwrap();
    assert_eq!(f.file_size().await.unwrap(), 3 * S);

    let mut buf = vec![0u8; 3 * S as usize];
    f.read_at(&mut buf, 0).await.unwrap();

    let mut expected = original.clone();
    expected[patch_off as usize..patch_off as usize + patch.len()].copy_from_slice(&patch);
    assert_eq!(buf, expected);

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_write_into_existing_partial_last_sector_past_eof() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "partial.db").await;

    // Partial last sector, then a write that starts past EOF but inside
    // the same sector.
    f.write_at(&[7; 100], 0).await.unwrap();
    f.write_at(&[9; 50], 200).await.unwrap();
    assert_eq!(f.file_size().await.unwrap(), 250);

    let mut buf = vec![0u8; 250];
    let out = f.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(out.n, 250);
    assert!(buf[..100].iter().all(|b| *b == 7));
    assert!(buf[100..200].iter().all(|b| *b == 0));
    assert!(buf[200..].iter().all(|b| *b == 9));

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_truncate_to_sector_boundary() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "boundary.db").await;

    f.write_at(&random_bytes(2 * S as usize + 77), 0).await.unwrap();
    f.truncate(S).await.unwrap();
    assert_eq!(f.file_size().await.unwrap(), S);

    // Growing truncate is a no-op.
    f.truncate(10 * S).await.unwrap();
    assert_eq!(f.file_size().await.unwrap(), S);

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_file_size_and_eof() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "empty.db").await;

    assert_eq!(f.file_size().await.unwrap(), 0);

    let mut buf = vec![0u8; 64];
    let out = f.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(out.n, 0);
    assert!(out.eof);

    f.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_handle_rejects_io() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "closed.db").await;
    f.write_at(b"x", 0).await.unwrap();
    f.close().await.unwrap();

    let mut buf = [0u8; 1];
    assert!(matches!(
        f.read_at(&mut buf, 0).await,
        Err(VfsError::Closed)
    ));
    assert!(matches!(f.write_at(b"y", 0).await, Err(VfsError::Closed)));

    // Close is idempotent.
    f.close().await.unwrap();
}

#[tokio::test]
async fn test_persists_across_reopen() {
    let store = Arc::new(MemoryBackend::new());
    let payload = random_bytes(200_000);

    let mut f = open_v1(&store, "persist.db").await;
    f.write_at(&payload, 0).await.unwrap();
    f.close().await.unwrap();

    let mut f = open_v1(&store, "persist.db").await;
    assert_eq!(f.file_size().await.unwrap(), payload.len() as i64);
    let mut buf = vec![0u8; payload.len()];
    f.read_at(&mut buf, 0).await.unwrap();
    assert_eq!(buf, payload);
    f.close().await.unwrap();
}

#[tokio::test]
async fn test_detects_sector_gap_as_corruption() {
    let store = Arc::new(MemoryBackend::new());
    let mut f = open_v1(&store, "corrupt.db").await;
    f.write_at(&random_bytes(100), 0).await.unwrap();

    // Plant a stray sector far past the real data.
    let meta = read_meta(&store, "corrupt.db").await;
    let stray = Codec::Zstd.encode(&vec![0u8; S as usize]).await.unwrap();
    store
        .put_item(
            &ItemKey::new(meta.data_row_key.clone(), 1 << 20),
            Item::from([("bytes".to_string(), AttrValue::B(stray.into()))]),
            None,
        )
        .await
        .unwrap();

    // The stray sector now defines the file size; reading the whole file
    // must surface corruption, not silently truncated data.
    let size = f.file_size().await.unwrap();
    assert_eq!(size, (1 << 20) + S);

    let mut buf = vec![0u8; size as usize];
    let err = f.read_at(&mut buf, 0).await.unwrap_err();
    assert!(
        matches!(err, VfsError::SectorGap { .. } | VfsError::SectorNotFound),
        "expected corruption error, got {err}"
    );

    f.close().await.unwrap();
}
