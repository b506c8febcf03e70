use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::TransportError;

/// Bidirectional frame pipe. Closing either end closes both.
#[async_trait]
pub trait Socket: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;
    /// Next frame, or `None` once the socket is closed.
    async fn recv(&self) -> Option<Vec<u8>>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// In-process socket end backed by unbounded channels.
pub struct MemorySocket {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: CancellationToken,
}

impl MemorySocket {
    pub fn pair() -> (MemorySocket, MemorySocket) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        (
            MemorySocket { tx: a_tx, rx: Mutex::new(a_rx), closed: closed.clone() },
            MemorySocket { tx: b_tx, rx: Mutex::new(b_rx), closed },
        )
    }
}

#[async_trait]
impl Socket for MemorySocket {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            frame = rx.recv() => frame,
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_and_close_is_shared() {
        let (a, b) = MemorySocket::pair();
        a.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(b.recv().await.as_deref(), Some(&b"ping"[..]));

        b.close();
        assert!(a.is_closed());
        assert_eq!(a.recv().await, None);
        assert_eq!(a.send(vec![1]).await, Err(TransportError::Closed));
    }
}
