use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::jobs::{JobRequest, JobResponse, RequestEnvelope, ResponseEnvelope};
use super::socket::Socket;
use super::TransportError;

type Reply = oneshot::Sender<Result<JobResponse, String>>;
type Pending = Arc<Mutex<HashMap<u64, Reply>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, Reply>> {
    match pending.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Sends requests over a socket and routes each response back to its caller
/// by message id. Safe to share between tasks.
pub struct TransportClient {
    socket: Arc<dyn Socket>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl TransportClient {
    /// Must be called inside a tokio runtime.
    pub fn new(socket: Arc<dyn Socket>) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_responses(socket.clone(), pending.clone()));
        Self { socket, pending, next_id: AtomicU64::new(0), reader }
    }

    pub async fn request(&self, payload: JobRequest) -> Result<JobResponse, TransportError> {
        let msg_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_vec(&RequestEnvelope { msg_id, payload })
            .map_err(|e| TransportError::Codec(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(msg_id, tx);
        // the reader clears pending after the socket closes
        if self.socket.is_closed() {
            lock(&self.pending).remove(&msg_id);
            return Err(TransportError::Closed);
        }
        if let Err(e) = self.socket.send(frame).await {
            lock(&self.pending).remove(&msg_id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(msg)) => Err(TransportError::Remote(msg)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Requests sent but not answered yet.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Close the socket; waiting callers get `Closed`.
    pub fn close(&self) {
        self.socket.close();
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_responses(socket: Arc<dyn Socket>, pending: Pending) {
    while let Some(frame) = socket.recv().await {
        let envelope: ResponseEnvelope = match serde_json::from_slice(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "transport client: dropping undecodable response");
                continue;
            }
        };
        match lock(&pending).remove(&envelope.msg_id) {
            Some(reply) => {
                let _ = reply.send(envelope.result);
            }
            None => warn!(msg_id = envelope.msg_id, "transport client: response for unknown request"),
        }
    }
    socket.close();
    let dropped = {
        let mut pending = lock(&pending);
        let n = pending.len();
        pending.clear();
        n
    };
    debug!(dropped, "transport client: socket closed");
}
