//! Resumable, adaptive chunked uploads into a cloud drive.
//!
//! This crate implements the upload **engine**. It owns no HTTP server and
//! no credential handling; the host hands it a [`DriveApi`] implementation
//! (normally [`driveup_graph::Client`]), a [`ByteSource`](driveup_transfer::ByteSource)
//! and a cancellation token.
//!
//! # Pipeline
//!
//! 1. **Decide**: files up to the small-file threshold go up in one request
//! 2. **Session**: create a replace-on-conflict session, or resume one and
//!    query which bytes it already holds
//! 3. **Stream**: read throughput-sized chunks and PUT them in order, with
//!    retry and backoff
//! 4. **Finish**: resolve the item id, notify progress subscribers, release
//!    the source

pub mod error;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{UploadError, UploadFailed};
pub use orchestrator::UploadOrchestrator;
pub use remote::{ApiFuture, DriveApi};
pub use retry::RetryPolicy;
pub use session::{ChunkAck, SessionState, UploadSession, UploadSessionHandle};
pub use types::{
    RetryConfig, TaskState, UploadConfig, UploadOutcome, UploadRequest, UploadTask,
};
