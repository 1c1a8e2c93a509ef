//! Lease-based global lock manager.
//!
//! SQLite's five lock levels are emulated with a single lease item per
//! file. `None` and `Shared` are tracked locally; the first transition
//! above `Shared` acquires the lease via CAS, a background task renews it
//! every `renew_interval`, and `Unlock(None)` releases it. A lease whose
//! deadline has passed may be stolen by another owner through a CAS on the
//! exact `(deadline_us, owner_id)` pair.

use crate::error::{Result, VfsError};
use donutdb_core::LockConfig;
use donutdb_store::{AttrValue, Condition, Item, ItemKey, KvStore, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::warn;

/// Lease attribute holding the owner's id.
pub const OWNER_ATTR: &str = "owner_id";

/// Lease attribute holding the expiry in microseconds since the epoch.
pub const DEADLINE_ATTR: &str = "deadline_us";

/// Bound on every channel hand-off with the heartbeat task. Blocking past
/// this means the task is wedged and lease state can no longer be trusted.
const CHANNEL_WAIT: Duration = Duration::from_secs(10);

/// SQLite's file lock levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    None = 0,
    Shared = 1,
    Reserved = 2,
    Pending = 3,
    Exclusive = 4,
}

/// Enforce SQLite's allowed upgrade transitions. Callers skip this for
/// `target <= current`, which is always a no-op.
pub(crate) fn validate_transition(cur: LockLevel, target: LockLevel) -> Result<()> {
    if cur == LockLevel::None && target > LockLevel::Shared {
        return Err(VfsError::InvalidLockTransition(
            "can only transition from unlocked to a shared lock",
        ));
    }
    if target == LockLevel::Pending {
        return Err(VfsError::InvalidLockTransition(
            "pending locks are never requested explicitly",
        ));
    }
    if target == LockLevel::Reserved && cur != LockLevel::Shared {
        return Err(VfsError::InvalidLockTransition(
            "can only transition to a reserved lock from a shared lock",
        ));
    }
    Ok(())
}

fn now_us() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64
}

fn lease_attrs(owner_id: &str, deadline_us: i64) -> Item {
    Item::from([
        (OWNER_ATTR.to_string(), AttrValue::S(owner_id.to_string())),
        (DEADLINE_ATTR.to_string(), AttrValue::N(deadline_us)),
    ])
}

fn lease_cas(owner_id: &str, deadline_us: i64) -> Condition {
    Condition::All(vec![
        Condition::AttributeEquals(DEADLINE_ATTR.to_string(), AttrValue::N(deadline_us)),
        Condition::AttributeEquals(OWNER_ATTR.to_string(), AttrValue::S(owner_id.to_string())),
    ])
}

/// Commands to the heartbeat task. One channel carries both so a start and
/// a fast-following stop can never be observed out of order.
enum TickerCmd {
    Start { prev_deadline_us: i64 },
    Stop,
}

/// Per-file lock manager. Not safe for concurrent callers: SQLite
/// serializes operations per file, and the owning file handle must do the
/// same.
pub struct GlobalLockManager {
    store: Arc<dyn KvStore>,
    lock_key: ItemKey,
    owner_id: String,
    config: LockConfig,

    level: LockLevel,
    leased: bool,
    closed: bool,

    cmd_tx: Option<mpsc::Sender<TickerCmd>>,
    unlock_rx: mpsc::Receiver<()>,
    task: Option<JoinHandle<()>>,
    shared_err: Arc<Mutex<Option<String>>>,
}

impl GlobalLockManager {
    /// Create a manager for `lock_row_key` and spawn its heartbeat task.
    pub fn new(
        store: Arc<dyn KvStore>,
        lock_row_key: &str,
        owner_id: &str,
        config: LockConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let (unlock_tx, unlock_rx) = mpsc::channel(1);
        let shared_err = Arc::new(Mutex::new(None));

        let lock_key = ItemKey::new(lock_row_key, 0);
        let heartbeat = HeartbeatTask {
            store: store.clone(),
            lock_key: lock_key.clone(),
            owner_id: owner_id.to_string(),
            config: config.clone(),
            cmd_rx,
            unlock_tx,
            shared_err: shared_err.clone(),
        };
        let task = tokio::spawn(heartbeat.run());

        Self {
            store,
            lock_key,
            owner_id: owner_id.to_string(),
            config,
            level: LockLevel::None,
            leased: false,
            closed: false,
            cmd_tx: Some(cmd_tx),
            unlock_rx,
            task: Some(task),
            shared_err,
        }
    }

    /// The locally-held lock level.
    pub fn level(&self) -> LockLevel {
        self.level
    }

    fn stored_err(&self) -> Option<VfsError> {
        if self.closed {
            return Some(VfsError::Lock("lock manager closed".to_string()));
        }
        self.shared_err
            .lock()
            .as_ref()
            .map(|msg| VfsError::Lock(msg.clone()))
    }

    /// Raise the lock level to `target`.
    ///
    /// Levels up to `Shared` are purely local. The first transition above
    /// `Shared` acquires the global lease: absent lease → conditional
    /// create; expired lease → conditional steal; anything else →
    /// [`VfsError::Busy`].
    pub async fn lock(&mut self, target: LockLevel) -> Result<()> {
        if let Some(err) = self.stored_err() {
            return Err(err);
        }

        if target <= self.level {
            return Ok(());
        }

        if target <= LockLevel::Shared || self.leased {
            // Already covered by the lease (or no lease needed yet), the
            // raise is local.
            self.level = target;
            return Ok(());
        }

        let item = self
            .store
            .get_item(&self.lock_key, Some(&[OWNER_ATTR, DEADLINE_ATTR]), true)
            .await?;

        let existing = item.as_ref().and_then(|item| {
            let deadline = item.get(DEADLINE_ATTR)?.as_n()?;
            let owner = item
                .get(OWNER_ATTR)
                .and_then(|v| v.as_s())
                .unwrap_or_default()
                .to_string();
            Some((owner, deadline))
        });

        let deadline_us = now_us() + self.config.lease_duration_us();
        let attrs = lease_attrs(&self.owner_id, deadline_us);

        let result = match existing {
            None => {
                // No one holds the lock, try to take it.
                self.store
                    .put_item(
                        &self.lock_key,
                        attrs,
                        Some(Condition::AttributeNotExists(DEADLINE_ATTR.to_string())),
                    )
                    .await
            }
            Some((old_owner, old_deadline)) if now_us() > old_deadline => {
                // The existing lease has expired, try to steal it.
                self.store
                    .put_item(
                        &self.lock_key,
                        attrs,
                        Some(lease_cas(&old_owner, old_deadline)),
                    )
                    .await
            }
            Some(_) => return Err(VfsError::Busy),
        };

        match result {
            Ok(()) => {
                self.level = target;
                self.leased = true;
                self.send_cmd(TickerCmd::Start {
                    prev_deadline_us: deadline_us,
                })
                .await;
                Ok(())
            }
            Err(err) if err.is_condition_failed() => Err(VfsError::Busy),
            Err(err) => Err(err.into()),
        }
    }

    /// Lower the lock level to `target` (`Shared` or `None`). Dropping to
    /// `None` releases the lease and waits for the heartbeat task to
    /// confirm the CAS delete.
    pub async fn unlock(&mut self, target: LockLevel) -> Result<()> {
        if let Some(err) = self.stored_err() {
            return Err(err);
        }

        if target > LockLevel::Shared {
            return Err(VfsError::InvalidLockTransition(
                "unlock target must be shared or none",
            ));
        }
        if self.level < target {
            return Err(VfsError::InvalidLockTransition(
                "cannot unlock to a level above the current level",
            ));
        }
        if target == self.level {
            return Ok(());
        }

        if target == LockLevel::Shared {
            self.level = LockLevel::Shared;
            return Ok(());
        }

        self.level = LockLevel::None;
        if self.leased {
            self.leased = false;
            self.send_cmd(TickerCmd::Stop).await;
            self.wait_unlock_done().await;
        }
        Ok(())
    }

    /// Whether any owner currently holds a write-intent lock on the file.
    pub async fn check_reserved_lock(&self) -> Result<bool> {
        if self.level > LockLevel::None {
            return Ok(true);
        }

        let item = self
            .store
            .get_item(&self.lock_key, Some(&[OWNER_ATTR, DEADLINE_ATTR]), true)
            .await?;
        let deadline = item.as_ref().and_then(|item| item.get(DEADLINE_ATTR)?.as_n());
        match deadline {
            Some(deadline) => Ok(now_us() < deadline),
            None => Ok(false),
        }
    }

    /// Shut down the heartbeat task, releasing a still-held lease without
    /// signaling, and surface any release error the task recorded.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.leased = false;

        // Dropping the command sender closes the channel, which the task
        // treats as shutdown.
        self.cmd_tx = None;
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }

        match self.shared_err.lock().take() {
            Some(msg) => Err(VfsError::Lock(msg)),
            None => Ok(()),
        }
    }

    async fn send_cmd(&self, cmd: TickerCmd) {
        let Some(cmd_tx) = &self.cmd_tx else {
            panic!("ticker command requested after close");
        };
        match timeout(CHANNEL_WAIT, cmd_tx.send(cmd)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => panic!("heartbeat task exited while the lock manager is live"),
            Err(_) => panic!("ticker command send blocked for more than 10s, something is wrong"),
        }
    }

    async fn wait_unlock_done(&mut self) {
        match timeout(CHANNEL_WAIT, self.unlock_rx.recv()).await {
            Ok(Some(())) => {}
            Ok(None) => panic!("heartbeat task exited while the lock manager is live"),
            Err(_) => panic!("unlock-done waited for more than 10s, something is wrong"),
        }
    }
}

struct HeartbeatTask {
    store: Arc<dyn KvStore>,
    lock_key: ItemKey,
    owner_id: String,
    config: LockConfig,

    cmd_rx: mpsc::Receiver<TickerCmd>,
    unlock_tx: mpsc::Sender<()>,
    shared_err: Arc<Mutex<Option<String>>>,
}

impl HeartbeatTask {
    async fn run(mut self) {
        let mut ticker = interval(self.config.renew_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut running = false;
        let mut prev_deadline_us = 0i64;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(TickerCmd::Start { prev_deadline_us: deadline }) => {
                            if running {
                                panic!("got start-ticker event for a lock we already held");
                            }
                            running = true;
                            prev_deadline_us = deadline;
                            ticker.reset();
                        }
                        Some(TickerCmd::Stop) => {
                            if !running {
                                panic!("got stop-ticker event but we don't hold a lock");
                            }
                            self.release(prev_deadline_us).await;
                            running = false;
                            let _ = self.unlock_tx.send(()).await;
                        }
                        None => {
                            // Closed channel means the manager is shutting
                            // down; release without signaling.
                            if running {
                                self.release(prev_deadline_us).await;
                            }
                            return;
                        }
                    }
                }
                _ = ticker.tick(), if running => {
                    let deadline_us = now_us() + self.config.lease_duration_us();
                    match self.renew(prev_deadline_us, deadline_us).await {
                        Ok(()) => prev_deadline_us = deadline_us,
                        Err(err) if err.is_condition_failed() => {
                            panic!("lost lock while heartbeating!");
                        }
                        Err(err) => {
                            // Maybe a transient error we'll recover from on
                            // the next tick; retry with the same deadline.
                            warn!(
                                error = %err,
                                lock = %self.lock_key.hash_key,
                                "error heartbeating lease"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn renew(&self, prev_deadline_us: i64, deadline_us: i64) -> std::result::Result<(), StoreError> {
        self.store
            .put_item(
                &self.lock_key,
                lease_attrs(&self.owner_id, deadline_us),
                Some(lease_cas(&self.owner_id, prev_deadline_us)),
            )
            .await
    }

    async fn release(&self, prev_deadline_us: i64) {
        let result = self
            .store
            .delete_item(
                &self.lock_key,
                Some(lease_cas(&self.owner_id, prev_deadline_us)),
            )
            .await;
        if let Err(err) = result {
            warn!(error = %err, lock = %self.lock_key.hash_key, "error releasing lease");
            *self.shared_err.lock() = Some(err.to_string());
        }
    }
}
