use std::time::Duration;

use serde::Serialize;

/// A contiguous byte window of the source file, sent as one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the upload (0-based).
    pub index: u64,
    /// Byte offset of the first byte.
    pub start: u64,
    /// Number of bytes.
    pub len: u64,
    /// Size of the whole file.
    pub total: u64,
}

impl Chunk {
    pub fn new(index: u64, start: u64, len: u64, total: u64) -> Self {
        Self {
            index,
            start,
            len,
            total,
        }
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// `true` iff this chunk ends exactly at the end of the file.
    pub fn is_final(&self) -> bool {
        self.end() == self.total
    }
}

/// Point-in-time upload progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    /// `100 * bytes_uploaded / total_bytes`, clamped to `[0, 100]`; 0 for empty files.
    pub percentage: f64,
    /// Recent throughput, 0 until enough samples exist.
    pub bytes_per_second: f64,
    /// Estimated seconds until done, while throughput is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

impl ProgressSnapshot {
    pub fn new(bytes_uploaded: u64, total_bytes: u64, bytes_per_second: f64) -> Self {
        let percentage = if total_bytes == 0 {
            0.0
        } else {
            (100.0 * bytes_uploaded as f64 / total_bytes as f64).clamp(0.0, 100.0)
        };
        Self {
            bytes_uploaded,
            total_bytes,
            percentage,
            bytes_per_second,
            eta_secs: None,
        }
    }

    pub fn with_eta(mut self, eta: Option<Duration>) -> Self {
        self.eta_secs = eta.map(|d| d.as_secs_f64());
        self
    }
}

/// Events delivered to progress subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadEvent {
    Progress(ProgressSnapshot),
    Completed { id: String, path: String, size: u64 },
    Cancelled { path: String },
    Failed { path: String, message: String },
}

impl UploadEvent {
    /// Returns `true` for the last event an upload emits.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadEvent::Progress(_))
    }
}
