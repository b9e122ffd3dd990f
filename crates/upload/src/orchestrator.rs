//! Upload orchestrator.
//!
//! Picks the small-file or chunked path, drives the
//! read → size → send → retry → advance loop, reconciles cancellation and
//! assembles the outcome.

use driveup_graph::DriveItem;
use driveup_transfer::{ByteSource, Chunk, ChunkSizer, ProgressReporter, UploadEvent};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{UploadError, UploadFailed};
use crate::remote::DriveApi;
use crate::retry::RetryPolicy;
use crate::session::{ChunkAck, UploadSession};
use crate::types::{TaskState, UploadConfig, UploadOutcome, UploadRequest, UploadTask};

/// Runs uploads against one drive.
///
/// Each call to [`upload`](Self::upload) is independent; one orchestrator
/// may serve many uploads concurrently.
pub struct UploadOrchestrator<'a> {
    api: &'a dyn DriveApi,
    config: UploadConfig,
    retry: RetryPolicy,
}

impl<'a> UploadOrchestrator<'a> {
    pub fn new(api: &'a dyn DriveApi, config: UploadConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        Self { api, config, retry }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// A reporter using the configured emission interval.
    pub fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter::new(Some(self.config.progress_interval()))
    }

    /// Uploads `request.total_bytes` bytes from `source`.
    ///
    /// `source` is closed and every subscriber of `reporter` receives a
    /// terminal event before this returns, whatever the outcome.
    pub async fn upload(
        &self,
        request: UploadRequest,
        mut source: ByteSource,
        mut reporter: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, UploadFailed> {
        let mut task = match UploadTask::new(&request) {
            Ok(task) => task,
            Err(cause) => {
                let path = format!("{}/{}", request.destination, request.file_name);
                source.close();
                reporter.finish(UploadEvent::Failed {
                    path: path.clone(),
                    message: cause.to_string(),
                });
                return Err(UploadFailed { path, cause });
            }
        };

        reporter.begin(task.total_bytes());
        info!(
            path = %task.full_path,
            size = task.total_bytes(),
            resume = request.resume_url.is_some(),
            "upload started"
        );

        let mut session = UploadSession::new(self.api, self.config.request_timeout());
        let result = self
            .run(
                &request,
                &mut task,
                &mut session,
                &mut source,
                &mut reporter,
                &cancel,
            )
            .await;

        let result = match result {
            Err(UploadError::Cancelled) => {
                session.cancel().await;
                Ok(UploadOutcome::Cancelled {
                    path: task.full_path.clone(),
                })
            }
            Err(e) => {
                session.fail();
                Err(e)
            }
            ok => ok,
        };

        source.close();
        finish(&mut task, &mut reporter, result)
    }

    async fn run(
        &self,
        request: &UploadRequest,
        task: &mut UploadTask,
        session: &mut UploadSession<'_>,
        source: &mut ByteSource,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let total = task.total_bytes();
        if total <= self.config.small_file_threshold && request.resume_url.is_none() {
            return self.run_small(task, session, source, reporter, cancel).await;
        }

        match &request.resume_url {
            Some(url) => {
                session.resume(url)?;
                self.retry.query_status(session, cancel).await?;
            }
            None => session.create(&task.full_path, &task.file_name).await?,
        }
        task.transition(TaskState::SessionCreated);

        let mut sizer = ChunkSizer::new(self.config.sizer.clone())?;
        let mut completed: Option<DriveItem> = None;
        let mut index = 0;
        let mut offset = 0;
        task.transition(TaskState::Streaming);

        while offset < total {
            if cancel.is_cancelled() {
                debug!(offset, "cancellation observed");
                return Err(UploadError::Cancelled);
            }

            let mut len = sizer.next_len(total - offset);
            let held_until = session.acknowledged_until();
            if offset < held_until {
                len = len.min(held_until - offset);
            }
            let chunk = Chunk::new(index, offset, len, total);

            let data = source.read(len as usize).await?;
            if (data.len() as u64) < len {
                return Err(UploadError::UnexpectedEndOfStream {
                    expected: total - offset - data.len() as u64,
                });
            }

            if session.is_acknowledged(&chunk) {
                debug!(index, offset, len, "skipping chunk already held by remote");
            } else {
                let started = Instant::now();
                let ack = self
                    .retry
                    .send_chunk(session, &chunk, &task.mime_type, &data, cancel)
                    .await?;
                if !chunk.is_final() {
                    sizer.record(len, started.elapsed());
                }
                if let ChunkAck::Completed(item) = ack {
                    completed = Some(item);
                }
            }

            task.acknowledge(len);
            reporter.advance(len);
            offset += len;
            index += 1;
        }

        if task.bytes_uploaded() != total {
            return Err(UploadError::UploadIncomplete {
                uploaded: task.bytes_uploaded(),
                total,
            });
        }
        session.finalize();

        let id = match completed.and_then(|item| item.id) {
            Some(id) => id,
            None => self.fetch_id(&task.full_path).await?,
        };
        Ok(UploadOutcome::Completed {
            id,
            path: task.full_path.clone(),
            size: total,
        })
    }

    async fn run_small(
        &self,
        task: &mut UploadTask,
        session: &mut UploadSession<'_>,
        source: &mut ByteSource,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let total = task.total_bytes();
        let data = source.read(total as usize).await?;
        if (data.len() as u64) < total {
            return Err(UploadError::UnexpectedEndOfStream {
                expected: total - data.len() as u64,
            });
        }

        let item = self
            .retry
            .upload_small(session, &task.full_path, &task.mime_type, &data, cancel)
            .await?;
        task.acknowledge(total);
        reporter.advance(total);

        let id = match item.id {
            Some(id) => id,
            None => self.fetch_id(&task.full_path).await?,
        };
        Ok(UploadOutcome::Completed {
            id,
            path: task.full_path.clone(),
            size: total,
        })
    }

    /// Looks up the id of a just-uploaded item.
    async fn fetch_id(&self, path: &str) -> Result<String, UploadError> {
        debug!(path, "completion carried no item id, fetching metadata");
        let item = tokio::time::timeout(self.config.request_timeout(), self.api.get_item(path))
            .await
            .map_err(|_| UploadError::ItemNotFound(format!("{path} (metadata fetch timed out)")))??;
        item.and_then(|item| item.id)
            .ok_or_else(|| UploadError::ItemNotFound(path.to_string()))
    }
}

/// Records the terminal state and notifies subscribers.
fn finish(
    task: &mut UploadTask,
    reporter: &mut ProgressReporter,
    result: Result<UploadOutcome, UploadError>,
) -> Result<UploadOutcome, UploadFailed> {
    match result {
        Ok(UploadOutcome::Completed { id, path, size }) => {
            task.transition(TaskState::Completed);
            info!(path = %path, id = %id, size, "upload completed");
            reporter.finish(UploadEvent::Completed {
                id: id.clone(),
                path: path.clone(),
                size,
            });
            Ok(UploadOutcome::Completed { id, path, size })
        }
        Ok(UploadOutcome::Cancelled { path }) => {
            task.transition(TaskState::Cancelled);
            info!(
                path = %path,
                uploaded = task.bytes_uploaded(),
                total = task.total_bytes(),
                "upload cancelled"
            );
            reporter.finish(UploadEvent::Cancelled { path: path.clone() });
            Ok(UploadOutcome::Cancelled { path })
        }
        Err(cause) => {
            task.transition(TaskState::Failed);
            debug!(path = %task.full_path, error = %cause, "upload failed");
            reporter.finish(UploadEvent::Failed {
                path: task.full_path.clone(),
                message: cause.to_string(),
            });
            Err(UploadFailed {
                path: task.full_path.clone(),
                cause,
            })
        }
    }
}
