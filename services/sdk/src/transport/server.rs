use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::jobs::{JobHandler, RequestEnvelope, ResponseEnvelope};
use super::socket::Socket;

/// Answers requests from one socket, each on its own task.
pub struct TransportServer {
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportServer {
    /// Must be called inside a tokio runtime.
    pub fn start(socket: Arc<dyn Socket>, handler: Arc<dyn JobHandler>) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(socket, handler, shutdown.clone()));
        info!("transport server: started");
        Self { shutdown, task: Mutex::new(Some(task)) }
    }

    /// Stop taking requests and wait for the ones in flight to answer.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "transport server: task panicked");
            }
            info!("transport server: stopped");
        }
    }
}

async fn serve(socket: Arc<dyn Socket>, handler: Arc<dyn JobHandler>, shutdown: CancellationToken) {
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            frame = socket.recv() => {
                let Some(frame) = frame else { break };
                let envelope: RequestEnvelope = match serde_json::from_slice(&frame) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(error = %e, "transport server: dropping undecodable request");
                        continue;
                    }
                };
                in_flight.spawn(respond(socket.clone(), handler.clone(), envelope));
            }
        }
    }
    debug!(in_flight = in_flight.len(), "transport server: draining");
    while in_flight.join_next().await.is_some() {}
}

async fn respond(socket: Arc<dyn Socket>, handler: Arc<dyn JobHandler>, envelope: RequestEnvelope) {
    let msg_id = envelope.msg_id;
    let result = handler.handle(envelope.payload).await.map_err(|e| e.to_string());
    let frame = match serde_json::to_vec(&ResponseEnvelope { msg_id, result }) {
        Ok(frame) => frame,
        Err(e) => {
            error!(msg_id, error = %e, "transport server: cannot encode response");
            return;
        }
    };
    if let Err(e) = socket.send(frame).await {
        warn!(msg_id, error = %e, "transport server: response not delivered");
    }
}
