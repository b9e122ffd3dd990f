//! In-memory drive used by the engine's tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use driveup_graph::{
    ChunkResponse, ConflictBehavior, ContentRange, DriveItem, Error, UploadSessionInfo,
};
use tokio_util::sync::CancellationToken;

use crate::remote::{ApiFuture, DriveApi};

/// A request as seen by [`MockDrive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    PutContent { path: String, len: usize },
    CreateSession { path: String, name: String },
    PutChunk { range: String, len: usize },
    Status,
    Delete { url: String },
    GetItem { path: String },
}

/// Records every request and answers from a script.
///
/// Chunk PUTs pop scripted results first; once the script is empty an
/// intermediate chunk is accepted and the final one completes the file.
pub(crate) struct MockDrive {
    calls: Mutex<Vec<Call>>,
    chunk_results: Mutex<VecDeque<Result<ChunkResponse, Error>>>,
    upload_url: Option<String>,
    status: UploadSessionInfo,
    final_item: DriveItem,
    hang_chunks: bool,
    failing_delete: bool,
    cancel_after_puts: Option<(usize, CancellationToken)>,
}

impl MockDrive {
    pub const UPLOAD_URL: &'static str = "https://up.example/session/1";

    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            chunk_results: Mutex::new(VecDeque::new()),
            upload_url: Some(Self::UPLOAD_URL.to_string()),
            status: UploadSessionInfo {
                next_expected_ranges: vec!["0-".into()],
                ..Default::default()
            },
            final_item: DriveItem {
                id: Some("01FINAL".into()),
                ..Default::default()
            },
            hang_chunks: false,
            failing_delete: false,
            cancel_after_puts: None,
        }
    }

    pub fn without_upload_url(mut self) -> Self {
        self.upload_url = None;
        self
    }

    pub fn with_status(mut self, status: UploadSessionInfo) -> Self {
        self.status = status;
        self
    }

    /// The completing chunk's answer carries no item id.
    pub fn without_final_id(mut self) -> Self {
        self.final_item.id = None;
        self
    }

    pub fn hang_chunks(mut self) -> Self {
        self.hang_chunks = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.failing_delete = true;
        self
    }

    /// Cancels `token` while answering the `puts`-th chunk PUT.
    pub fn cancel_after_puts(mut self, puts: usize, token: CancellationToken) -> Self {
        self.cancel_after_puts = Some((puts, token));
        self
    }

    pub fn push_chunk_error(&self, status: u16) {
        self.chunk_results.lock().unwrap().push_back(Err(Error::Api {
            status,
            body: String::new(),
        }));
    }

    pub fn push_chunk_accepted(&self) {
        self.chunk_results
            .lock()
            .unwrap()
            .push_back(Ok(ChunkResponse::Accepted {
                next_expected_ranges: Vec::new(),
            }));
    }

    pub fn push_chunk_unauthorized(&self) {
        self.chunk_results
            .lock()
            .unwrap()
            .push_back(Err(Error::Unauthorized));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn put_count(&self) -> usize {
        self.chunk_ranges().len()
    }

    pub fn chunk_ranges(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::PutChunk { range, .. } => Some(range.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        calls
            .iter()
            .filter(|c| matches!(c, Call::PutChunk { .. }))
            .count()
    }
}

impl DriveApi for MockDrive {
    fn put_content<'a>(
        &'a self,
        path: &'a str,
        _mime_type: &'a str,
        data: Vec<u8>,
    ) -> ApiFuture<'a, DriveItem> {
        self.record(Call::PutContent {
            path: path.to_string(),
            len: data.len(),
        });
        let item = DriveItem {
            id: Some("01SMALL".into()),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            size: data.len() as u64,
            ..Default::default()
        };
        Box::pin(async move { Ok(item) })
    }

    fn create_upload_session<'a>(
        &'a self,
        path: &'a str,
        file_name: &'a str,
        _conflict_behavior: ConflictBehavior,
    ) -> ApiFuture<'a, UploadSessionInfo> {
        self.record(Call::CreateSession {
            path: path.to_string(),
            name: file_name.to_string(),
        });
        let info = UploadSessionInfo {
            upload_url: self.upload_url.clone(),
            next_expected_ranges: vec!["0-".into()],
            ..Default::default()
        };
        Box::pin(async move { Ok(info) })
    }

    fn put_chunk<'a>(
        &'a self,
        _upload_url: &'a str,
        range: ContentRange,
        _mime_type: &'a str,
        data: Vec<u8>,
    ) -> ApiFuture<'a, ChunkResponse> {
        let puts = self.record(Call::PutChunk {
            range: range.to_string(),
            len: data.len(),
        });
        if self.hang_chunks {
            return Box::pin(std::future::pending::<Result<ChunkResponse, Error>>());
        }
        if let Some((after, token)) = &self.cancel_after_puts {
            if puts == *after {
                token.cancel();
            }
        }

        let scripted = self.chunk_results.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            if range.start + range.len == range.total {
                Ok(ChunkResponse::Completed(self.final_item.clone()))
            } else {
                Ok(ChunkResponse::Accepted {
                    next_expected_ranges: Vec::new(),
                })
            }
        });
        Box::pin(async move { result })
    }

    fn upload_status<'a>(&'a self, _upload_url: &'a str) -> ApiFuture<'a, UploadSessionInfo> {
        self.record(Call::Status);
        let info = self.status.clone();
        Box::pin(async move { Ok(info) })
    }

    fn delete_upload_session<'a>(&'a self, upload_url: &'a str) -> ApiFuture<'a, ()> {
        self.record(Call::Delete {
            url: upload_url.to_string(),
        });
        let failing = self.failing_delete;
        Box::pin(async move {
            if failing {
                Err(Error::Api {
                    status: 500,
                    body: "delete failed".into(),
                })
            } else {
                Ok(())
            }
        })
    }

    fn get_item<'a>(&'a self, path: &'a str) -> ApiFuture<'a, Option<DriveItem>> {
        self.record(Call::GetItem {
            path: path.to_string(),
        });
        let item = DriveItem {
            id: Some("01FETCHED".into()),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            ..Default::default()
        };
        Box::pin(async move { Ok(Some(item)) })
    }
}
