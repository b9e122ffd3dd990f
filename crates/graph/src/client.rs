//! Drive API client.
//!
//! Async HTTP client using `reqwest`. Item endpoints carry a Bearer token;
//! pre-authorized upload session URLs are called without it.

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, HeaderValue};
use tracing::{debug, warn};

use crate::types::{
    ChunkResponse, ConflictBehavior, ContentRange, CreateSessionRequest, DriveItem, SessionItem,
    UploadSessionInfo,
};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Characters left untouched inside a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Errors from the drive client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("access token rejected")]
    Unauthorized,

    #[error("invalid access token")]
    InvalidToken,

    #[error("invalid byte range: {0:?}")]
    InvalidRange(String),
}

impl Error {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Unauthorized => Some(401),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Drive API client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    auth: HeaderValue,
}

impl Client {
    /// Creates a new client with the given access token.
    pub fn new(access_token: &str) -> Result<Self, Error> {
        Self::build(access_token, None)
    }

    /// Creates a client whose requests time out after `timeout`.
    pub fn with_timeout(access_token: &str, timeout: Duration) -> Result<Self, Error> {
        Self::build(access_token, Some(timeout))
    }

    fn build(access_token: &str, timeout: Option<Duration>) -> Result<Self, Error> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| Error::InvalidToken)?;
        auth.set_sensitive(true);

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            auth,
        })
    }

    /// Points the client at another API root, e.g. a national cloud or a test server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// URL of a path-addressed item, with `suffix` appended (e.g. `":/content"`).
    fn item_url(&self, path: &str, suffix: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| utf8_percent_encode(s, PATH_SEGMENT).to_string())
            .collect();
        format!(
            "{}/me/drive/root:/{}{}",
            self.base_url,
            encoded.join("/"),
            suffix
        )
    }

    /// Uploads a whole file in a single request.
    pub async fn put_content(
        &self,
        path: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<DriveItem, Error> {
        let url = self.item_url(path, ":/content");
        debug!(path, bytes = data.len(), "single-request upload");
        let resp = self
            .http
            .put(&url)
            .header(AUTHORIZATION, self.auth.clone())
            .header(CONTENT_TYPE, mime_type)
            .body(data)
            .send()
            .await?;
        let body = check(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Opens a resumable upload session for `path`.
    pub async fn create_upload_session(
        &self,
        path: &str,
        file_name: &str,
        conflict_behavior: ConflictBehavior,
    ) -> Result<UploadSessionInfo, Error> {
        let url = self.item_url(path, ":/createUploadSession");
        let request = CreateSessionRequest {
            item: SessionItem {
                conflict_behavior,
                name: file_name,
            },
        };
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.auth.clone())
            .json(&request)
            .send()
            .await?;
        let body = check(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Sends one chunk to a session URL.
    ///
    /// 416 (range already received) is returned as `Error::Api` so callers
    /// can decide what it means for them.
    pub async fn put_chunk(
        &self,
        upload_url: &str,
        range: ContentRange,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<ChunkResponse, Error> {
        let resp = self
            .http
            .put(upload_url)
            .header(CONTENT_RANGE, range.to_string())
            .header(CONTENT_TYPE, mime_type)
            .body(data)
            .send()
            .await?;
        let status = resp.status();
        let body = check(resp).await?;

        if status == StatusCode::ACCEPTED {
            // Some deployments omit the body; the ranges are advisory anyway.
            let next_expected_ranges = match serde_json::from_slice::<UploadSessionInfo>(&body) {
                Ok(info) => info.expected_ranges().unwrap_or_else(|e| {
                    warn!(error = %e, "ignoring malformed nextExpectedRanges");
                    Vec::new()
                }),
                Err(_) => Vec::new(),
            };
            return Ok(ChunkResponse::Accepted {
                next_expected_ranges,
            });
        }

        if body.is_empty() {
            return Ok(ChunkResponse::Completed(DriveItem::default()));
        }
        Ok(ChunkResponse::Completed(serde_json::from_slice(&body)?))
    }

    /// Queries which ranges a session still expects.
    pub async fn upload_status(&self, upload_url: &str) -> Result<UploadSessionInfo, Error> {
        let resp = self.http.get(upload_url).send().await?;
        let body = check(resp).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Discards a session and any bytes it holds.
    pub async fn delete_upload_session(&self, upload_url: &str) -> Result<(), Error> {
        let resp = self.http.delete(upload_url).send().await?;
        check(resp).await?;
        Ok(())
    }

    /// Fetches item metadata; `None` if nothing exists at `path`.
    pub async fn get_item(&self, path: &str) -> Result<Option<DriveItem>, Error> {
        let url = self.item_url(path, "");
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, self.auth.clone())
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check(resp).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    /// Returns `true` if `folder` already holds an item called `name`.
    pub async fn item_exists(&self, folder: &str, name: &str) -> Result<bool, Error> {
        let path = format!("{folder}/{name}");
        Ok(self.get_item(&path).await?.is_some())
    }
}

/// Maps non-success statuses to errors and returns the body.
async fn check(resp: reqwest::Response) -> Result<Vec<u8>, Error> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.bytes().await?.to_vec())
}
