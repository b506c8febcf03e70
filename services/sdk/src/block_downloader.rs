//! Background producer of block batches with bounded look-ahead

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::fifo::MemoryFifo;
use crate::provider::RollupProvider;
use crate::sleep::InterruptibleSleep;

/// Requests end on multiples of this many rollups so the world state always
/// inserts whole aligned subtrees.
pub const BLOCK_ALIGNMENT: u32 = 128;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

struct Shared {
    provider: Arc<dyn RollupProvider>,
    queue: MemoryFifo<Vec<Block>>,
    // one permit per batch the consumer has not taken yet
    slots: Semaphore,
    sleep: InterruptibleSleep,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown: CancellationToken,
}

pub struct BlockDownloader {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BlockDownloader {
    pub fn new(provider: Arc<dyn RollupProvider>, max_queue_size: usize, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                queue: MemoryFifo::new(),
                slots: Semaphore::new(max_queue_size.max(1)),
                sleep: InterruptibleSleep::new(),
                poll_interval,
                running: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Batches downloaded but not yet taken.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Start fetching at rollup `from`. No-op if already running; a stopped
    /// downloader cannot be restarted.
    pub async fn start(&self, from: u32) {
        // held across the spawn so stop() always finds the handle
        let mut task = self.task.lock().await;
        if self.shared.shutdown.is_cancelled() {
            warn!("block downloader: start after stop ignored");
            return;
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(from, "block downloader: started");
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move { run(shared, from).await }));
    }

    /// Next downloaded batch, in rollup order. `None` once stopped.
    pub async fn get_blocks(&self) -> Option<Vec<Block>> {
        let blocks = self.shared.queue.get().await?;
        self.shared.slots.add_permits(1);
        Some(blocks)
    }

    /// Stop fetching, wake any waiter and wait for the producer to exit.
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.shutdown.cancel();
        self.shared.sleep.interrupt_all();
        self.shared.slots.close();
        self.shared.queue.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("block downloader: stopped");
        }
    }
}

async fn run(shared: Arc<Shared>, mut from: u32) {
    while shared.running.load(Ordering::SeqCst) {
        let permit = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            p = shared.slots.acquire() => p,
        };
        // closed by stop()
        let Ok(permit) = permit else { break };

        let take = BLOCK_ALIGNMENT - from % BLOCK_ALIGNMENT;
        let fetched = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            r = shared.provider.get_blocks(from, take) => r,
        };

        match fetched {
            Ok(blocks) if !blocks.is_empty() => {
                let last = blocks.last().map(|b| b.rollup_id).unwrap_or(from);
                debug!(from, count = blocks.len(), last, "block downloader: fetched");
                from = last + 1;
                // released by get_blocks()
                permit.forget();
                if !shared.queue.put(blocks) {
                    break;
                }
            }
            Ok(_) => {
                drop(permit);
                shared.sleep.sleep(shared.poll_interval).await;
            }
            Err(e) => {
                warn!(from, "block downloader: get_blocks failed: {e:?}");
                drop(permit);
                shared.sleep.sleep(shared.poll_interval).await;
            }
        }
    }
    shared.running.store(false, Ordering::SeqCst);
}
