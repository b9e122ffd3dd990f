//! Bounded exponential-backoff retry around session requests.

use std::time::Duration;

use driveup_graph::DriveItem;
use driveup_transfer::Chunk;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::UploadError;
use crate::session::{ChunkAck, UploadSession};
use crate::types::RetryConfig;

/// Retries transient failures with exponential backoff.
///
/// A 416 answer never reaches this layer as a failure, so it never
/// consumes a retry. Sleeping between attempts ends early on cancellation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `retry` (1-based): `base * 2^retry`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Sends a chunk, retrying transient failures.
    pub async fn send_chunk(
        &self,
        session: &mut UploadSession<'_>,
        chunk: &Chunk,
        mime_type: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ChunkAck, UploadError> {
        let mut retry = 0;
        loop {
            match session.send_chunk(chunk, mime_type, data).await {
                Ok(ack) => return Ok(ack),
                Err(e) => {
                    retry += 1;
                    if let Err(e) = self.back_off(e, retry, cancel).await {
                        if !matches!(e, UploadError::Cancelled) {
                            session.fail();
                        }
                        return Err(e);
                    }
                    session.mark_retrying(chunk.index, retry);
                }
            }
        }
    }

    /// Single-request upload, retrying transient failures.
    pub async fn upload_small(
        &self,
        session: &mut UploadSession<'_>,
        path: &str,
        mime_type: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DriveItem, UploadError> {
        let mut retry = 0;
        loop {
            match session.upload_small(path, mime_type, data).await {
                Ok(item) => return Ok(item),
                Err(e) => {
                    retry += 1;
                    self.back_off(e, retry, cancel).await?;
                }
            }
        }
    }

    /// Status query, retrying transient failures.
    pub async fn query_status(
        &self,
        session: &mut UploadSession<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64, UploadError> {
        let mut retry = 0;
        loop {
            match session.query_status().await {
                Ok(until) => return Ok(until),
                Err(e) => {
                    retry += 1;
                    self.back_off(e, retry, cancel).await?;
                }
            }
        }
    }

    /// Returns `err` if it is final, otherwise waits out the backoff.
    async fn back_off(
        &self,
        err: UploadError,
        retry: u32,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        if !err.is_transient() || retry > self.max_retries {
            return Err(err);
        }

        let delay = self.delay_for_retry(retry);
        warn!(
            retry,
            max_retries = self.max_retries,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            error = %err,
            "transient failure, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
