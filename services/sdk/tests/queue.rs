mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::*;
use rollup_sdk::block_context::BlockContext;
use rollup_sdk::config::LockConfig;
use rollup_sdk::fifo::MemoryFifo;
use rollup_sdk::lock::{DbMutex, LockDb, SqlLockDb};
use rollup_sdk::serial_queue::{AnySerialQueue, MutexSerialQueue, QueueError, SerialQueue};
use rollup_sdk::world_state::WorldState;
use rollup_sdk::SharedStorage;
use tempfile::TempDir;
use tokio::time::sleep;
use tree::FileBackedStorage;

#[tokio::test]
async fn test_fifo_cancel_wakes_waiting_consumer() {
    let fifo = Arc::new(MemoryFifo::<u32>::new());
    let waiter = {
        let fifo = fifo.clone();
        tokio::spawn(async move { fifo.get().await })
    };
    sleep(Duration::from_millis(20)).await;
    fifo.cancel();
    assert_eq!(waiter.await.unwrap(), None);
    assert!(!fifo.put(1));
}

#[tokio::test]
async fn test_serial_queue_runs_one_at_a_time_in_order() {
    let queue = Arc::new(SerialQueue::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let running = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let queue = queue.clone();
        let log = log.clone();
        let running = running.clone();
        handles.push(tokio::spawn(async move {
            queue
                .push(move || async move {
                    assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                    sleep(Duration::from_millis(2)).await;
                    log.lock().unwrap().push(i);
                    running.fetch_sub(1, Ordering::SeqCst);
                    i * 10
                })
                .await
        }));
        // fix the push order
        sleep(Duration::from_millis(1)).await;
    }

    for (i, h) in handles.into_iter().enumerate() {
        assert_eq!(h.await.unwrap(), Ok(i as u32 * 10));
    }
    assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
    queue.destroy().await;
}

#[tokio::test]
async fn test_destroy_cancels_pending_and_waits_for_running() {
    let queue = Arc::new(SerialQueue::new());
    let finished = Arc::new(AtomicUsize::new(0));

    let running = {
        let queue = queue.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            queue
                .push(move || async move {
                    sleep(Duration::from_millis(100)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .await
        })
    };
    sleep(Duration::from_millis(20)).await;
    let pending = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.push(|| async { 1 }).await })
    };
    sleep(Duration::from_millis(20)).await;

    queue.destroy().await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(running.await.unwrap(), Ok(()));
    assert_eq!(pending.await.unwrap(), Err(QueueError::Cancelled));
    assert_eq!(queue.push(|| async { 2 }).await, Err(QueueError::Closed));
}

#[tokio::test]
async fn test_panicking_item_does_not_stop_the_queue() {
    let queue = SerialQueue::new();
    let err = queue.push(|| async { panic!("boom") }).await.map(|_: ()| ()).unwrap_err();
    assert!(matches!(err, QueueError::Panicked(_)));
    assert_eq!(queue.push(|| async { 7 }).await, Ok(7));
    queue.destroy().await;
}

fn lock_config() -> LockConfig {
    LockConfig {
        database_url: String::new(),
        expiry: Duration::from_millis(200),
        ping_interval: Duration::from_millis(50),
        try_lock_interval: Duration::from_millis(10),
    }
}

fn lock_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("locks.db").display())
}

/// A fresh handle on the lock database, as another process would open it.
fn lock_db(dir: &TempDir) -> Arc<dyn LockDb> {
    Arc::new(SqlLockDb::connect_lazy(&lock_url(dir)).unwrap())
}

#[tokio::test]
async fn test_second_holder_waits_for_release() {
    let dir = tempfile::tempdir().unwrap();
    let a = Arc::new(DbMutex::new(lock_db(&dir), "world-state", lock_config()));
    let b = Arc::new(DbMutex::new(lock_db(&dir), "world-state", lock_config()));
    assert_ne!(a.owner(), b.owner());

    a.lock().await.unwrap();
    let started = Instant::now();
    let waiter = {
        let b = b.clone();
        tokio::spawn(async move {
            b.lock().await.unwrap();
            started.elapsed()
        })
    };

    // held well past expiry thanks to the ping
    sleep(Duration::from_millis(500)).await;
    assert!(!waiter.is_finished());

    a.unlock().await;
    let waited = waiter.await.unwrap();
    assert!(waited >= Duration::from_millis(500));
    b.unlock().await;
}

#[tokio::test]
async fn test_independent_lock_handles_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let first = lock_db(&dir);
    let second = lock_db(&dir);
    let lease = Duration::from_secs(60);

    assert!(first.try_acquire("world-state", "proc-a", lease).await.unwrap());
    assert!(!second.try_acquire("world-state", "proc-b", lease).await.unwrap());
    // re-entrant for the holder, renewable only by it
    assert!(first.try_acquire("world-state", "proc-a", lease).await.unwrap());
    assert!(!second.renew("world-state", "proc-b", lease).await.unwrap());
    assert!(second.renew("world-state", "proc-a", lease).await.unwrap());

    first.release("world-state", "proc-a").await.unwrap();
    assert!(second.try_acquire("world-state", "proc-b", lease).await.unwrap());
    assert!(!first.try_acquire("world-state", "proc-a", lease).await.unwrap());
}

#[tokio::test]
async fn test_unrenewed_lease_lapses() {
    let dir = tempfile::tempdir().unwrap();
    let db = lock_db(&dir);
    assert!(db.try_acquire("l", "crashed", Duration::from_millis(50)).await.unwrap());
    assert!(!db.try_acquire("l", "other", Duration::from_millis(50)).await.unwrap());

    sleep(Duration::from_millis(80)).await;
    assert!(db.try_acquire("l", "other", Duration::from_millis(50)).await.unwrap());
    assert!(!db.renew("l", "crashed", Duration::from_millis(50)).await.unwrap());

    // release by a non-owner leaves the lease alone
    db.release("l", "crashed").await.unwrap();
    assert!(!db.try_acquire("l", "third", Duration::from_millis(50)).await.unwrap());
}

#[tokio::test]
async fn test_destroyed_mutex_rejects_lock() {
    let dir = tempfile::tempdir().unwrap();
    let holder = DbMutex::new(lock_db(&dir), "m", lock_config());
    holder.lock().await.unwrap();

    let blocked = Arc::new(DbMutex::new(lock_db(&dir), "m", lock_config()));
    let waiter = {
        let blocked = blocked.clone();
        tokio::spawn(async move { blocked.lock().await })
    };
    sleep(Duration::from_millis(30)).await;
    blocked.destroy();
    assert!(matches!(waiter.await.unwrap(), Err(QueueError::Lock(_))));
    holder.unlock().await;
}

#[tokio::test]
async fn test_mutex_queue_holds_lease_per_item() {
    let dir = tempfile::tempdir().unwrap();
    let db = lock_db(&dir);
    let mutex = Arc::new(DbMutex::new(lock_db(&dir), "q", lock_config()));
    let queue = MutexSerialQueue::new(mutex);

    let outsider = db.clone();
    let held_inside = queue
        .push(move || async move { !outsider.try_acquire("q", "outsider", Duration::from_millis(50)).await.unwrap() })
        .await
        .unwrap();
    assert!(held_inside);

    // released after the item
    assert!(db.try_acquire("q", "outsider", Duration::from_millis(50)).await.unwrap());
    queue.destroy().await;
}

#[tokio::test]
async fn test_panicking_item_releases_lease() {
    let dir = tempfile::tempdir().unwrap();
    let db = lock_db(&dir);
    let config = LockConfig { expiry: Duration::from_secs(60), ..lock_config() };
    let queue = MutexSerialQueue::new(Arc::new(DbMutex::new(lock_db(&dir), "q", config)));

    let err = queue.push(|| async { panic!("item failed") }).await.map(|_: ()| ()).unwrap_err();
    assert!(matches!(err, QueueError::Panicked(_)));

    // well inside the 60s expiry, so only an explicit release frees it
    assert!(db.try_acquire("q", "outsider", Duration::from_millis(50)).await.unwrap());
    db.release("q", "outsider").await.unwrap();
    assert_eq!(queue.push(|| async { 3 }).await, Ok(3));
    queue.destroy().await;
}

/// World state of one process: its own storage handle, lock handle and queue.
fn process_world_state(dir: &TempDir) -> WorldState {
    let storage: SharedStorage = Arc::new(FileBackedStorage::new(dir.path().join("sdk.json")).unwrap());
    let mutex = Arc::new(DbMutex::new(lock_db(dir), "world-state", lock_config()));
    WorldState::new(storage, hasher(), AnySerialQueue::Locked(MutexSerialQueue::new(mutex))).unwrap()
}

#[tokio::test]
async fn test_world_states_sharing_a_file_extend_one_tree() {
    let dir = tempfile::tempdir().unwrap();
    let algos = algos();
    let owner = account().public_key();
    let ctx = |b| Arc::new(BlockContext::from_block(b, hasher()).unwrap());

    let a = process_world_state(&dir);
    let b = process_world_state(&dir);

    let first = ctx(block(0, vec![deposit_to(&algos, &owner, 5, 0).proof], vec![Vec::new()]));
    let second = ctx(block(1, vec![deposit_to(&algos, &owner, 6, 0).proof], vec![Vec::new()]));
    let (ra, rb) = tokio::join!(a.apply_blocks(vec![first.clone()]), b.apply_blocks(vec![first, second.clone()]));
    ra.unwrap();
    rb.unwrap();
    assert_eq!(a.apply_blocks(vec![second]).await.unwrap(), Some(1));

    // both handles and a later reader agree on one tree holding both blocks
    let state_a = a.consistent_state().await.unwrap();
    let state_b = b.consistent_state().await.unwrap();
    assert_eq!(state_a, state_b);
    assert_eq!(state_a.size, 2 * ROLLUP_SIZE as u64 * 2);

    let reader = WorldState::new(
        Arc::new(FileBackedStorage::new(dir.path().join("sdk.json")).unwrap()),
        hasher(),
        AnySerialQueue::Plain(SerialQueue::new()),
    )
    .unwrap();
    assert_eq!(reader.state(), state_a);
    assert_eq!(reader.synced_to_rollup().unwrap(), Some(1));

    a.destroy().await;
    b.destroy().await;
    reader.destroy().await;
}
