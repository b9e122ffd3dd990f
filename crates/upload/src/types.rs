//! Data types for the upload flow.

use std::time::Duration;

use driveup_transfer::{ChunkSizerConfig, normalize_full_path};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Lifecycle of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Pending,
    SessionCreated,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed
        )
    }

    fn rank(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::SessionCreated => 1,
            TaskState::Streaming => 2,
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => 3,
        }
    }
}

/// What the caller wants uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    /// Destination folder; `/` is the drive root.
    pub destination: String,
    pub total_bytes: u64,
    /// Session URL of an interrupted upload of the same file.
    pub resume_url: Option<String>,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        destination: impl Into<String>,
        total_bytes: u64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            destination: destination.into(),
            total_bytes,
            resume_url: None,
        }
    }

    pub fn resume(mut self, upload_url: impl Into<String>) -> Self {
        self.resume_url = Some(upload_url.into());
        self
    }
}

/// Bookkeeping for one upload, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file_name: String,
    pub mime_type: String,
    pub destination: String,
    pub full_path: String,
    total_bytes: u64,
    bytes_uploaded: u64,
    state: TaskState,
}

impl UploadTask {
    /// Validates names and resolves the full remote path.
    pub fn new(request: &UploadRequest) -> Result<Self, UploadError> {
        let full_path = normalize_full_path(&request.destination, &request.file_name)?;
        Ok(Self {
            file_name: request.file_name.clone(),
            mime_type: request.mime_type.clone(),
            destination: request.destination.clone(),
            full_path,
            total_bytes: request.total_bytes,
            bytes_uploaded: 0,
            state: TaskState::Pending,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    pub fn remaining(&self) -> u64 {
        self.total_bytes - self.bytes_uploaded
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Records acknowledged bytes. Returns the bytes actually added, which
    /// is less than `bytes` only if the total would be exceeded.
    pub fn acknowledge(&mut self, bytes: u64) -> u64 {
        let added = bytes.min(self.remaining());
        self.bytes_uploaded += added;
        added
    }

    /// Moves forward in the lifecycle. Backward moves and moves out of a
    /// terminal state are ignored; returns whether the state changed.
    pub fn transition(&mut self, next: TaskState) -> bool {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }
}

/// Terminal result of an upload that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed { id: String, path: String, size: u64 },
    Cancelled { path: String },
}

/// Backoff settings for chunk retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Files of at most this many bytes go up in a single request.
    pub small_file_threshold: u64,
    pub request_timeout_secs: u64,
    pub progress_interval_ms: u64,
    pub sizer: ChunkSizerConfig,
    pub retry: RetryConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            small_file_threshold: 4 * 1024 * 1024,
            request_timeout_secs: 120,
            progress_interval_ms: 1000,
            sizer: ChunkSizerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
