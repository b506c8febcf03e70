use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::fifo::MemoryFifo;
use crate::lock::DbMutex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("queued item was cancelled")]
    Cancelled,
    #[error("lock failed: {0}")]
    Lock(String),
    #[error("queued item panicked: {0}")]
    Panicked(String),
}

/// Run an item on its own task so a panic comes back as an error instead of
/// taking the queue worker down with it.
async fn run_isolated<Fut, T>(fut: Fut) -> Result<T, QueueError>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut).await.map_err(|e| QueueError::Panicked(e.to_string()))
}

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Runs pushed closures one at a time in FIFO order on a single worker task.
pub struct SerialQueue {
    fifo: Arc<MemoryFifo<Job>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialQueue {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let fifo: Arc<MemoryFifo<Job>> = Arc::new(MemoryFifo::new());
        let f = fifo.clone();
        let worker = tokio::spawn(async move {
            while let Some(job) = f.get().await {
                job().await;
            }
            debug!("serial queue worker stopped");
        });
        Self { fifo, worker: Mutex::new(Some(worker)) }
    }

    /// Enqueue `f` and wait for its result.
    pub async fn push<F, Fut, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let out = run_isolated(f()).await;
                let _ = tx.send(out);
            })
        });
        if !self.fifo.put(job) {
            return Err(QueueError::Closed);
        }
        // dropped unrun by destroy()
        rx.await.map_err(|_| QueueError::Cancelled)?
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Refuse new work, drop pending items and wait for the running one.
    pub async fn destroy(&self) {
        self.fifo.cancel();
        let worker = match self.worker.lock() {
            Ok(mut w) => w.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

/// [`SerialQueue`] whose items additionally hold a cross-process lease for
/// their whole run. The lease is released and its renewal stopped even when
/// the item panics.
pub struct MutexSerialQueue {
    queue: SerialQueue,
    mutex: Arc<DbMutex>,
}

impl MutexSerialQueue {
    pub fn new(mutex: Arc<DbMutex>) -> Self {
        Self { queue: SerialQueue::new(), mutex }
    }

    pub async fn push<F, Fut, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mutex = self.mutex.clone();
        self.queue
            .push(move || async move {
                mutex.lock().await?;
                let out = run_isolated(f()).await;
                mutex.unlock().await;
                out
            })
            .await?
    }

    pub async fn destroy(&self) {
        self.mutex.destroy();
        self.queue.destroy().await;
    }
}

/// Either queue flavour behind one push interface.
pub enum AnySerialQueue {
    Plain(SerialQueue),
    Locked(MutexSerialQueue),
}

impl AnySerialQueue {
    pub async fn push<F, Fut, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            AnySerialQueue::Plain(q) => q.push(f).await,
            AnySerialQueue::Locked(q) => q.push(f).await,
        }
    }

    pub async fn destroy(&self) {
        match self {
            AnySerialQueue::Plain(q) => q.destroy().await,
            AnySerialQueue::Locked(q) => q.destroy().await,
        }
    }
}
