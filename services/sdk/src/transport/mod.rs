//! Job dispatch between the SDK and out-of-process workers
//!
//! Requests and responses are closed enums in JSON envelopes tagged with a
//! message id, so one socket carries any number of concurrent jobs.

mod client;
mod jobs;
mod server;
mod socket;

use thiserror::Error;

pub use client::TransportClient;
pub use jobs::{
    JobHandler, JobRequest, JobResponse, RemoteProver, RequestEnvelope, ResponseEnvelope, SdkJobHandler,
    TransportHashPathSource,
};
pub use server::TransportServer;
pub use socket::{MemorySocket, Socket};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("socket closed")]
    Closed,

    #[error("remote job failed: {0}")]
    Remote(String),

    #[error("codec error: {0}")]
    Codec(String),
}
