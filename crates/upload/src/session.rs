//! Upload session protocol state machine.
//!
//! One [`UploadSession`] drives one remote session: creation (or the
//! single-request small-file path), ranged chunk PUTs, status queries for
//! resumption, and best-effort cancellation.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use driveup_graph::{ChunkResponse, ConflictBehavior, ContentRange, DriveItem};
use driveup_transfer::Chunk;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::remote::DriveApi;

/// Protocol state of an [`UploadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Sending { index: u64 },
    Acknowledged { index: u64 },
    Retrying { index: u64, attempt: u32 },
    Failed,
    Finalized,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Failed | SessionState::Finalized | SessionState::Cancelled
        )
    }
}

/// Remote session identity plus what the remote is known to hold.
#[derive(Debug, Clone)]
pub struct UploadSessionHandle {
    upload_url: String,
    acknowledged: BTreeSet<u64>,
    acknowledged_until: u64,
}

impl UploadSessionHandle {
    fn new(upload_url: String) -> Self {
        Self {
            upload_url,
            acknowledged: BTreeSet::new(),
            acknowledged_until: 0,
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Every byte before this offset was reported as received.
    pub fn acknowledged_until(&self) -> u64 {
        self.acknowledged_until
    }

    /// Indices of chunks acknowledged in this session.
    pub fn acknowledged_chunks(&self) -> &BTreeSet<u64> {
        &self.acknowledged
    }

    /// `true` iff the whole chunk lies before the first expected range.
    pub fn is_acknowledged(&self, chunk: &Chunk) -> bool {
        chunk.end() <= self.acknowledged_until
    }

    fn acknowledge(&mut self, chunk: &Chunk) {
        self.acknowledged.insert(chunk.index);
    }
}

/// How the remote answered a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkAck {
    /// Intermediate chunk stored.
    Accepted,
    /// The file is assembled.
    Completed(DriveItem),
    /// 416: the remote already holds this range.
    AlreadyAccepted,
    /// Nothing to send.
    Skipped,
}

/// Drives one remote upload session.
pub struct UploadSession<'a> {
    api: &'a dyn DriveApi,
    state: SessionState,
    handle: Option<UploadSessionHandle>,
    request_timeout: Duration,
}

impl<'a> UploadSession<'a> {
    pub fn new(api: &'a dyn DriveApi, request_timeout: Duration) -> Self {
        Self {
            api,
            state: SessionState::Uninitialized,
            handle: None,
            request_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> Option<&UploadSessionHandle> {
        self.handle.as_ref()
    }

    pub fn acknowledged_until(&self) -> u64 {
        self.handle.as_ref().map_or(0, |h| h.acknowledged_until)
    }

    /// `true` if resumption state says `chunk` need not be sent.
    pub fn is_acknowledged(&self, chunk: &Chunk) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_acknowledged(chunk))
    }

    /// Uploads the whole file in one request, skipping the session protocol.
    pub async fn upload_small(
        &mut self,
        path: &str,
        mime_type: &str,
        data: &[u8],
    ) -> Result<DriveItem, UploadError> {
        self.expect_state(SessionState::Uninitialized, "small-file upload")?;
        let timeout = self.request_timeout;
        let result = with_timeout(timeout, self.api.put_content(path, mime_type, data.to_vec())).await;
        match result {
            Some(Ok(item)) => {
                self.state = SessionState::Finalized;
                info!(path, size = data.len(), "small file uploaded");
                Ok(item)
            }
            Some(Err(e)) => Err(chunk_error(0, e)),
            None => Err(timed_out(0, timeout)),
        }
    }

    /// Opens a remote session that replaces whatever exists at `path`.
    pub async fn create(&mut self, path: &str, file_name: &str) -> Result<(), UploadError> {
        self.expect_state(SessionState::Uninitialized, "session creation")?;
        let timeout = self.request_timeout;
        let info = match with_timeout(
            timeout,
            self.api
                .create_upload_session(path, file_name, ConflictBehavior::Replace),
        )
        .await
        {
            Some(Ok(info)) => info,
            Some(Err(driveup_graph::Error::Unauthorized)) => {
                return Err(UploadError::CredentialRejected);
            }
            Some(Err(e)) => return Err(UploadError::SessionCreationFailed(e.to_string())),
            None => {
                return Err(UploadError::SessionCreationFailed(format!(
                    "no response within {}s",
                    timeout.as_secs()
                )));
            }
        };

        let upload_url = match info.upload_url {
            Some(url) if !url.is_empty() => url,
            _ => {
                return Err(UploadError::SessionCreationFailed(
                    "response carried no upload URL".into(),
                ));
            }
        };

        info!(path, expires = ?info.expiration_date_time, "upload session created");
        self.handle = Some(UploadSessionHandle::new(upload_url));
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Attaches to an existing session. Call [`query_status`](Self::query_status)
    /// next to learn what it already holds.
    pub fn resume(&mut self, upload_url: &str) -> Result<(), UploadError> {
        self.expect_state(SessionState::Uninitialized, "session resumption")?;
        if upload_url.is_empty() {
            return Err(UploadError::InvalidState("empty upload URL".into()));
        }
        info!("resuming upload session");
        self.handle = Some(UploadSessionHandle::new(upload_url.to_string()));
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Asks the remote which ranges it still expects and returns the offset
    /// before which every byte is held.
    ///
    /// Only bytes before the first expected range count as held; later gaps
    /// are re-sent.
    pub async fn query_status(&mut self) -> Result<u64, UploadError> {
        let upload_url = self.upload_url()?.to_string();
        let timeout = self.request_timeout;
        let info = match with_timeout(timeout, self.api.upload_status(&upload_url)).await {
            Some(Ok(info)) => info,
            Some(Err(driveup_graph::Error::Unauthorized)) => {
                return Err(UploadError::CredentialRejected);
            }
            Some(Err(e)) if e.status() == Some(404) => {
                return Err(UploadError::InvalidState(
                    "upload session no longer exists".into(),
                ));
            }
            Some(Err(e)) => return Err(UploadError::StatusQueryFailed(e.to_string())),
            None => {
                return Err(UploadError::StatusQueryFailed(format!(
                    "no response within {}s",
                    timeout.as_secs()
                )));
            }
        };

        let ranges = info
            .expected_ranges()
            .map_err(|e| UploadError::StatusQueryFailed(e.to_string()))?;
        if ranges.len() > 1 {
            warn!(
                gaps = ranges.len(),
                "remote reports several missing ranges; resending from the first"
            );
        }
        let until = ranges.iter().map(|r| r.start).min().unwrap_or(0);

        debug!(acknowledged_until = until, "session status");
        if let Some(handle) = self.handle.as_mut() {
            handle.acknowledged_until = until;
        }
        Ok(until)
    }

    /// Sends one chunk.
    ///
    /// A 416 answer means the remote already holds the range and is folded
    /// into success. Any other failure is reported as
    /// [`UploadError::ChunkTransferFailed`] unless the credential was rejected.
    pub async fn send_chunk(
        &mut self,
        chunk: &Chunk,
        mime_type: &str,
        data: &[u8],
    ) -> Result<ChunkAck, UploadError> {
        let upload_url = self.upload_url()?.to_string();
        if chunk.len == 0 {
            return Ok(ChunkAck::Skipped);
        }
        if data.len() as u64 != chunk.len {
            return Err(UploadError::InvalidState(format!(
                "chunk {} declares {} bytes but carries {}",
                chunk.index,
                chunk.len,
                data.len()
            )));
        }

        self.state = SessionState::Sending { index: chunk.index };
        let range = ContentRange::new(chunk.start, chunk.len, chunk.total);
        let timeout = self.request_timeout;
        let result = with_timeout(
            timeout,
            self.api
                .put_chunk(&upload_url, range, mime_type, data.to_vec()),
        )
        .await;

        let ack = match result {
            Some(Ok(ChunkResponse::Accepted { .. })) => ChunkAck::Accepted,
            Some(Ok(ChunkResponse::Completed(item))) => ChunkAck::Completed(item),
            Some(Err(e)) if e.status() == Some(416) => {
                debug!(index = chunk.index, range = %range, "range already held by remote");
                ChunkAck::AlreadyAccepted
            }
            Some(Err(e)) => return Err(chunk_error(chunk.index, e)),
            None => return Err(timed_out(chunk.index, timeout)),
        };

        self.state = SessionState::Acknowledged { index: chunk.index };
        if let Some(handle) = self.handle.as_mut() {
            handle.acknowledge(chunk);
        }
        debug!(index = chunk.index, offset = chunk.start, len = chunk.len, "chunk acknowledged");
        Ok(ack)
    }

    pub fn mark_retrying(&mut self, index: u64, attempt: u32) {
        if !self.state.is_terminal() {
            self.state = SessionState::Retrying { index, attempt };
        }
    }

    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    pub fn finalize(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Finalized;
        }
    }

    /// Deletes the remote session. Failures are logged, never returned.
    pub async fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Cancelled;
        let Some(handle) = self.handle.as_ref() else {
            return;
        };

        let timeout = self.request_timeout;
        match with_timeout(timeout, self.api.delete_upload_session(&handle.upload_url)).await {
            Some(Ok(())) => info!("upload session cancelled"),
            Some(Err(e)) => warn!(error = %e, "failed to delete upload session"),
            None => warn!(
                timeout_secs = timeout.as_secs(),
                "timed out deleting upload session"
            ),
        }
    }

    fn upload_url(&self) -> Result<&str, UploadError> {
        self.handle
            .as_ref()
            .map(|h| h.upload_url.as_str())
            .ok_or_else(|| UploadError::InvalidState("no upload session".into()))
    }

    fn expect_state(&self, expected: SessionState, op: &str) -> Result<(), UploadError> {
        if self.state != expected {
            return Err(UploadError::InvalidState(format!(
                "{op} requires {expected:?}, session is {:?}",
                self.state
            )));
        }
        Ok(())
    }
}

/// Awaits `fut`, giving up after `timeout`.
async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, fut).await.ok()
}

fn chunk_error(index: u64, e: driveup_graph::Error) -> UploadError {
    match e {
        driveup_graph::Error::Unauthorized => UploadError::CredentialRejected,
        e => UploadError::ChunkTransferFailed {
            index,
            reason: e.to_string(),
        },
    }
}

fn timed_out(index: u64, timeout: Duration) -> UploadError {
    UploadError::ChunkTransferFailed {
        index,
        reason: format!("no response within {}s", timeout.as_secs()),
    }
}
