//! Cross-handle locking over the shared lease.

mod common;

use common::{read_meta, vfs_with};
use donutdb_store::{AttrValue, Item, ItemKey, KvStore, MemoryBackend};
use donutdb_vfs::{LockLevel, OpenFlags, VfsError, VfsFile};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_reserved_is_mutually_exclusive_across_handles() {
    let store = Arc::new(MemoryBackend::new());
    let vfs1 = vfs_with(store.clone(), 2);
    let vfs2 = vfs_with(store.clone(), 2);

    let mut h1 = vfs1.open("locked.db", OpenFlags::default()).await.unwrap();
    let mut h2 = vfs2.open("locked.db", OpenFlags::default()).await.unwrap();

    h1.lock(LockLevel::Shared).await.unwrap();
    h1.lock(LockLevel::Reserved).await.unwrap();

    // Shared readers coexist with the writer's lease.
    h2.lock(LockLevel::Shared).await.unwrap();

    // A second write intent loses.
    let err = h2.lock(LockLevel::Reserved).await.unwrap_err();
    assert!(err.is_busy());

    h1.unlock(LockLevel::None).await.unwrap();

    // The lease is gone; the other handle can now reserve.
    let mut acquired = false;
    for _ in 0..50 {
        match h2.lock(LockLevel::Reserved).await {
            Ok(()) => {
                acquired = true;
                break;
            }
            Err(VfsError::Busy) => tokio::time::sleep(Duration::from_millis(20)).await,
            Err(err) => panic!("unexpected lock error: {err}"),
        }
    }
    assert!(acquired, "reserved lock never became available");

    h2.unlock(LockLevel::None).await.unwrap();
    h1.close().await.unwrap();
    h2.close().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_keeps_lease_alive() {
    let store = Arc::new(MemoryBackend::new());
    let vfs1 = vfs_with(store.clone(), 2);
    let vfs2 = vfs_with(store.clone(), 2);

    let mut h1 = vfs1.open("beat.db", OpenFlags::default()).await.unwrap();
    let mut h2 = vfs2.open("beat.db", OpenFlags::default()).await.unwrap();

    h1.lock(LockLevel::Shared).await.unwrap();
    h1.lock(LockLevel::Exclusive).await.unwrap();

    // Sleep well past the lease duration (400ms); renewals every 100ms
    // must keep the holder alive.
    tokio::time::sleep(Duration::from_millis(900)).await;

    h2.lock(LockLevel::Shared).await.unwrap();
    let err = h2.lock(LockLevel::Exclusive).await.unwrap_err();
    assert!(err.is_busy());

    h1.unlock(LockLevel::None).await.unwrap();
    h2.unlock(LockLevel::None).await.unwrap();
    h1.close().await.unwrap();
    h2.close().await.unwrap();
}

#[tokio::test]
async fn test_expired_lease_is_stolen() {
    let store = Arc::new(MemoryBackend::new());
    let vfs = vfs_with(store.clone(), 2);

    let mut h = vfs.open("steal.db", OpenFlags::default()).await.unwrap();
    let meta = read_meta(&store, "steal.db").await;

    // Seed a lease from a departed owner whose deadline already passed.
    store
        .put_item(
            &ItemKey::new(meta.lock_row_key.clone(), 0),
            Item::from([
                (
                    "owner_id".to_string(),
                    AttrValue::S("deadbeefdeadbeef".to_string()),
                ),
                ("deadline_us".to_string(), AttrValue::N(1)),
            ]),
            None,
        )
        .await
        .unwrap();

    h.lock(LockLevel::Shared).await.unwrap();
    h.lock(LockLevel::Reserved).await.unwrap();

    // The lease now belongs to this process.
    let lease = store
        .get_item(&ItemKey::new(meta.lock_row_key, 0), None, true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        lease.get("owner_id").and_then(|v| v.as_s()),
        Some(vfs.owner_id())
    );
    assert!(lease.get("deadline_us").and_then(|v| v.as_n()).unwrap() > 1);

    h.unlock(LockLevel::None).await.unwrap();
    h.close().await.unwrap();
}

#[tokio::test]
async fn test_unlock_to_none_releases_lease() {
    let store = Arc::new(MemoryBackend::new());
    let vfs = vfs_with(store.clone(), 2);

    let mut h = vfs.open("release.db", OpenFlags::default()).await.unwrap();
    let meta = read_meta(&store, "release.db").await;
    let lock_key = ItemKey::new(meta.lock_row_key, 0);

    h.lock(LockLevel::Shared).await.unwrap();
    h.lock(LockLevel::Reserved).await.unwrap();
    assert!(store.get_item(&lock_key, None, true).await.unwrap().is_some());

    h.unlock(LockLevel::None).await.unwrap();
    assert!(store.get_item(&lock_key, None, true).await.unwrap().is_none());

    h.close().await.unwrap();
}

#[tokio::test]
async fn test_downgrade_to_shared_keeps_lease() {
    let store = Arc::new(MemoryBackend::new());
    let vfs1 = vfs_with(store.clone(), 2);
    let vfs2 = vfs_with(store.clone(), 2);

    let mut h1 = vfs1.open("downgrade.db", OpenFlags::default()).await.unwrap();
    let mut h2 = vfs2.open("downgrade.db", OpenFlags::default()).await.unwrap();

    h1.lock(LockLevel::Shared).await.unwrap();
    h1.lock(LockLevel::Exclusive).await.unwrap();
    h1.unlock(LockLevel::Shared).await.unwrap();

    // Still leased until the holder drops to none.
    h2.lock(LockLevel::Shared).await.unwrap();
    let err = h2.lock(LockLevel::Reserved).await.unwrap_err();
    assert!(err.is_busy());

    h1.unlock(LockLevel::None).await.unwrap();
    h2.lock(LockLevel::Reserved).await.unwrap();

    h2.unlock(LockLevel::None).await.unwrap();
    h1.close().await.unwrap();
    h2.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_transitions_error() {
    let store = Arc::new(MemoryBackend::new());
    let vfs = vfs_with(store.clone(), 2);
    let mut h = vfs.open("invalid.db", OpenFlags::default()).await.unwrap();

    // Unlocked straight to a write lock.
    assert!(matches!(
        h.lock(LockLevel::Reserved).await,
        Err(VfsError::InvalidLockTransition(_))
    ));
    assert!(matches!(
        h.lock(LockLevel::Exclusive).await,
        Err(VfsError::InvalidLockTransition(_))
    ));

    // Pending is never requested explicitly.
    h.lock(LockLevel::Shared).await.unwrap();
    assert!(matches!(
        h.lock(LockLevel::Pending).await,
        Err(VfsError::InvalidLockTransition(_))
    ));

    // Unlock only downgrades.
    assert!(matches!(
        h.unlock(LockLevel::Exclusive).await,
        Err(VfsError::InvalidLockTransition(_))
    ));

    h.unlock(LockLevel::None).await.unwrap();
    h.close().await.unwrap();
}

#[tokio::test]
async fn test_check_reserved_lock() {
    let store = Arc::new(MemoryBackend::new());
    let vfs1 = vfs_with(store.clone(), 2);
    let vfs2 = vfs_with(store.clone(), 2);

    let mut h1 = vfs1.open("reserved.db", OpenFlags::default()).await.unwrap();
    let mut h2 = vfs2.open("reserved.db", OpenFlags::default()).await.unwrap();

    assert!(!h2.check_reserved_lock().await.unwrap());

    h1.lock(LockLevel::Shared).await.unwrap();
    h1.lock(LockLevel::Reserved).await.unwrap();

    // Holder sees its own lock; the other handle sees the live lease.
    assert!(h1.check_reserved_lock().await.unwrap());
    assert!(h2.check_reserved_lock().await.unwrap());

    h1.unlock(LockLevel::None).await.unwrap();
    assert!(!h2.check_reserved_lock().await.unwrap());

    h1.close().await.unwrap();
    h2.close().await.unwrap();
}

#[tokio::test]
async fn test_close_releases_held_lease() {
    let store = Arc::new(MemoryBackend::new());
    let vfs = vfs_with(store.clone(), 2);

    let mut h = vfs.open("abandon.db", OpenFlags::default()).await.unwrap();
    let meta = read_meta(&store, "abandon.db").await;
    let lock_key = ItemKey::new(meta.lock_row_key, 0);

    h.lock(LockLevel::Shared).await.unwrap();
    h.lock(LockLevel::Exclusive).await.unwrap();
    assert!(store.get_item(&lock_key, None, true).await.unwrap().is_some());

    // Closing with the lock still held must not leak the lease.
    h.close().await.unwrap();
    assert!(store.get_item(&lock_key, None, true).await.unwrap().is_none());
}
