//! Byte-level building blocks for chunked uploads.
//!
//! - [`ByteSource`]: pull-based reads of arbitrary length over any inbound transport
//! - [`ChunkSizer`]: throughput-adaptive chunk length policy
//! - [`ProgressReporter`]: rate-limited progress fan-out to subscribers
//! - [`normalize_full_path`]: remote path joining and validation

mod path;
mod progress;
mod sizer;
mod source;
mod types;

pub use path::{normalize_full_path, validate_file_name};
pub use progress::{ProgressReporter, ProgressSubscription, SpeedCalculator, SubscriberId};
pub use sizer::{ChunkSizer, ChunkSizerConfig};
pub use source::ByteSource;
pub use types::{Chunk, ProgressSnapshot, UploadEvent};

/// Block size that upload-session chunk lengths must be a multiple of: 320 KiB.
///
/// Only the final chunk of an upload may be shorter.
pub const CHUNK_ALIGNMENT: u64 = 320 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream: {expected} more bytes expected")]
    UnexpectedEndOfStream { expected: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid chunk sizing: {0}")]
    InvalidConfig(String),
}
