//! Upload error types.

use driveup_transfer::TransferError;

/// Errors produced while driving an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("byte source ended early: {expected} more bytes expected")]
    UnexpectedEndOfStream { expected: u64 },

    #[error("session creation failed: {0}")]
    SessionCreationFailed(String),

    #[error("chunk {index} failed: {reason}")]
    ChunkTransferFailed { index: u64, reason: String },

    #[error("status query failed: {0}")]
    StatusQueryFailed(String),

    #[error("upload ended at {uploaded} of {total} bytes")]
    UploadIncomplete { uploaded: u64, total: u64 },

    #[error("access credential rejected")]
    CredentialRejected,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("uploaded item not found: {0}")]
    ItemNotFound(String),

    #[error("transfer error: {0}")]
    Transfer(#[source] TransferError),

    #[error("drive API error: {0}")]
    Api(#[source] driveup_graph::Error),
}

impl UploadError {
    /// Returns `true` for failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UploadError::ChunkTransferFailed { .. } | UploadError::StatusQueryFailed(_)
        )
    }
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::UnexpectedEndOfStream { expected } => {
                UploadError::UnexpectedEndOfStream { expected }
            }
            other => UploadError::Transfer(other),
        }
    }
}

impl From<driveup_graph::Error> for UploadError {
    fn from(e: driveup_graph::Error) -> Self {
        match e {
            driveup_graph::Error::Unauthorized => UploadError::CredentialRejected,
            other => UploadError::Api(other),
        }
    }
}

/// Terminal failure of one upload, carrying the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("upload of {path} failed: {cause}")]
pub struct UploadFailed {
    pub path: String,
    #[source]
    pub cause: UploadError,
}
