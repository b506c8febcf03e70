use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// Unbounded async FIFO with cancellation.
///
/// After [`cancel`](Self::cancel) queued items are dropped, `put` is refused
/// and every pending or future `get` yields `None`.
pub struct MemoryFifo<T> {
    state: Mutex<FifoState<T>>,
    notify: Notify,
}

struct FifoState<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

impl<T> Default for MemoryFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryFifo<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FifoState { items: VecDeque::new(), cancelled: false }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FifoState<T>> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// `false` once cancelled; the item is dropped.
    pub fn put(&self, item: T) -> bool {
        {
            let mut state = self.lock();
            if state.cancelled {
                return false;
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        true
    }

    pub async fn get(&self) -> Option<T> {
        loop {
            // registered before the check so a concurrent put/cancel is not missed
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.cancelled {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn cancel(&self) {
        let dropped = {
            let mut state = self.lock();
            state.cancelled = true;
            std::mem::take(&mut state.items)
        };
        drop(dropped);
        self.notify.notify_waiters();
    }
}
