//! HTTP routes.
//!
//! `POST /api/upload?path=<folder>&silent=<bool>` takes a multipart `file`
//! field, spools it to disk and streams `text/plain` progress lines back
//! while the engine uploads it. The last line is a JSON outcome.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use driveup_graph::Client;
use driveup_transfer::{ByteSource, UploadEvent, normalize_full_path};
use driveup_upload::{UploadConfig, UploadOrchestrator, UploadOutcome, UploadRequest};
use serde::Deserialize;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::ServerConfig;

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Shared state of every request.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<Client>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(client: Client, config: ServerConfig) -> Self {
        Self {
            client: Arc::new(client),
            config: Arc::new(config),
        }
    }
}

/// Errors answered before the streamed body starts.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .nest("/api", api)
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = req.headers().get(API_KEY_HEADER) else {
        return Err(ApiError::Unauthorized("API key is required"));
    };
    let valid = key
        .to_str()
        .is_ok_and(|key| state.config.api_keys.iter().any(|k| k == key));
    if !valid {
        warn!(uri = %req.uri(), "rejected invalid API key");
        return Err(ApiError::Unauthorized("Invalid API key"));
    }
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    path: Option<String>,
    silent: Option<String>,
}

/// A multipart file written to an anonymous temp file.
struct Spooled {
    file: tokio::fs::File,
    file_name: String,
    mime_type: String,
    size: u64,
}

async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let folder = match query.path {
        Some(p) if !p.is_empty() => p,
        _ => return Err(ApiError::BadRequest("Upload path is required".into())),
    };
    let silent = query.silent.as_deref() == Some("true");
    if state.config.access_token.is_empty() {
        return Err(ApiError::Unauthorized("Unauthorized"));
    }

    let mut spooled = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("file name is required".into()))?;
        normalize_full_path(&folder, &file_name)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let exists = state
            .client
            .item_exists(&folder, &file_name)
            .await
            .map_err(|e| ApiError::BadGateway(e.to_string()))?;
        if exists {
            return Err(ApiError::Conflict(
                "File already exists in the destination folder".into(),
            ));
        }

        spooled = Some(spool(field, file_name, &state.config.spool_dir()).await?);
        break;
    }
    let Some(spooled) = spooled else {
        return Err(ApiError::BadRequest("file field is required".into()));
    };
    debug!(file = %spooled.file_name, size = spooled.size, "file spooled");

    let request = UploadRequest::new(
        spooled.file_name,
        spooled.mime_type,
        folder,
        spooled.size,
    );
    let source = ByteSource::from_reader(spooled.file);

    let (tx, rx) = mpsc::channel::<String>(64);
    let cancel = CancellationToken::new();
    let span = info_span!("upload", id = %Uuid::new_v4());
    tokio::spawn(
        run_upload(
            state.client.clone(),
            state.config.upload.clone(),
            request,
            source,
            silent,
            tx,
            cancel.clone(),
        )
        .instrument(span),
    );

    // Dropping the body (client gone) drops the guard, which cancels the upload.
    let guard = cancel.drop_guard();
    let stream = futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let line = rx.recv().await?;
        Some((Ok::<_, Infallible>(line), (rx, guard)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn spool(
    mut field: Field<'_>,
    file_name: String,
    dir: &Path,
) -> Result<Spooled, ApiError> {
    let mime_type = field
        .content_type()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();
    let mut file = tokio::fs::File::from_std(tempfile::tempfile_in(dir)?);

    let mut size = 0u64;
    while let Some(bytes) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        file.write_all(&bytes).await?;
        size += bytes.len() as u64;
    }
    file.flush().await?;
    file.rewind().await?;

    Ok(Spooled {
        file,
        file_name,
        mime_type,
        size,
    })
}

/// Runs one upload and writes its progress lines to `tx`.
async fn run_upload(
    client: Arc<Client>,
    config: UploadConfig,
    request: UploadRequest,
    source: ByteSource,
    silent: bool,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let file_name = request.file_name.clone();
    if !silent {
        let _ = tx
            .send(format!(
                "Starting upload of {} to {}\n",
                file_name, request.destination
            ))
            .await;
    }

    let orchestrator = UploadOrchestrator::new(client.as_ref(), config);
    let mut reporter = orchestrator.progress_reporter();
    let mut progress = reporter.subscribe();

    let forward = async {
        while let Some(event) = progress.recv().await {
            if let UploadEvent::Progress(snapshot) = event
                && !silent
            {
                let _ = tx
                    .send(format!("Progress: {:.2}%\n", snapshot.percentage))
                    .await;
            }
        }
    };
    let (result, ()) = tokio::join!(
        orchestrator.upload(request, source, reporter, cancel),
        forward
    );

    let last = match result {
        Ok(UploadOutcome::Completed { id, path, size }) => {
            info!(path = %path, "upload finished");
            outcome_line(&UploadEvent::Completed { id, path, size })
        }
        Ok(UploadOutcome::Cancelled { path }) => {
            let _ = tx
                .send(format!("Upload cancelled for: {file_name}\n"))
                .await;
            outcome_line(&UploadEvent::Cancelled { path })
        }
        Err(failed) => {
            error!(path = %failed.path, error = %failed.cause, "upload failed");
            serde_json::json!({
                "error": "Upload failed",
                "message": failed.cause.to_string(),
            })
            .to_string()
        }
    };
    let _ = tx.send(last).await;
}

fn outcome_line(event: &UploadEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use driveup_transfer::ChunkSizerConfig;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    const ITEM: &str = r#"{"id":"NEWID","name":"a.txt","size":5}"#;

    #[derive(Clone, Default)]
    struct DriveScript {
        /// Answer the existence check with 200 instead of 404.
        exists: bool,
        /// Each chunk PUT waits for one notification before answering.
        gate: Option<Arc<Notify>>,
    }

    /// Starts a mock drive API and reports every request it sees as
    /// `"METHOD /path"`.
    async fn mock_drive(script: DriveScript) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let session_url = format!("{base}/session");
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer(
                    stream,
                    script.clone(),
                    session_url.clone(),
                    tx.clone(),
                ));
            }
        });
        (base, rx)
    }

    /// Serves one request per connection.
    async fn answer(
        mut stream: TcpStream,
        script: DriveScript,
        session_url: String,
        seen: mpsc::UnboundedSender<String>,
    ) {
        let mut buf = Vec::new();
        let mut tmp = vec![0u8; 8192];
        let header_end = loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        let content_length = header("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body_len = buf.len() - header_end;
        while body_len < content_length {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                break;
            }
            body_len += n;
        }

        let _ = seen.send(format!("{method} {path}"));
        let (status, body) = match (method.as_str(), path.as_str()) {
            ("GET", p) if p.starts_with("/me/drive/root:") => {
                if script.exists {
                    (200, ITEM.to_string())
                } else {
                    (404, r#"{"error":{"code":"itemNotFound"}}"#.to_string())
                }
            }
            ("PUT", p) if p.ends_with(":/content") => (201, ITEM.to_string()),
            ("POST", p) if p.ends_with(":/createUploadSession") => (
                200,
                serde_json::json!({
                    "uploadUrl": session_url,
                    "nextExpectedRanges": ["0-"],
                })
                .to_string(),
            ),
            ("PUT", "/session") => {
                if let Some(gate) = &script.gate {
                    gate.notified().await;
                }
                // "bytes s-e/total"
                let is_final = header("content-range")
                    .and_then(|r| {
                        let (range, total) = r.strip_prefix("bytes ")?.split_once('/')?;
                        let end: u64 = range.split_once('-')?.1.parse().ok()?;
                        Some(end + 1 == total.parse::<u64>().ok()?)
                    })
                    .unwrap_or(false);
                if is_final {
                    (201, ITEM.to_string())
                } else {
                    (202, String::new())
                }
            }
            ("DELETE", "/session") => (204, String::new()),
            _ => (500, String::new()),
        };

        let response = format!(
            "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    fn drive_app(base: &str, upload: UploadConfig) -> Router {
        let config = ServerConfig {
            access_token: "t".into(),
            api_keys: vec!["secret".into()],
            upload,
            ..Default::default()
        };
        let client = Client::new("t").unwrap().with_base_url(base);
        router(AppState::new(client, config))
    }

    /// Every file takes the session path, two bytes per chunk.
    fn two_byte_chunks() -> UploadConfig {
        UploadConfig {
            small_file_threshold: 0,
            sizer: ChunkSizerConfig {
                alignment: 2,
                baseline: 2,
                min: 2,
                max: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn body_text(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn next_request(seen: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn drain(seen: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut requests = Vec::new();
        while let Ok(r) = seen.try_recv() {
            requests.push(r);
        }
        requests
    }

    fn app(access_token: &str) -> Router {
        let config = ServerConfig {
            access_token: access_token.into(),
            api_keys: vec!["secret".into()],
            ..Default::default()
        };
        // Unroutable base URL; these tests never reach the drive.
        let client = Client::new("token")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        router(AppState::new(client, config))
    }

    fn multipart_request(uri: &str, key: Option<&str>) -> Request {
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--{boundary}--\r\n"
        );
        let mut builder = axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            );
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn error_message(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        json["error"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn healthz_needs_no_key() {
        let resp = app("t")
            .oneshot(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_api_key_is_unauthorized() {
        let resp = app("t")
            .oneshot(multipart_request("/api/upload?path=/docs", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(resp).await, "API key is required");
    }

    #[tokio::test]
    async fn wrong_api_key_is_unauthorized() {
        let resp = app("t")
            .oneshot(multipart_request("/api/upload?path=/docs", Some("guess")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_message(resp).await, "Invalid API key");
    }

    #[tokio::test]
    async fn missing_path_is_bad_request() {
        let resp = app("t")
            .oneshot(multipart_request("/api/upload", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_message(resp).await, "Upload path is required");
    }

    #[tokio::test]
    async fn missing_access_token_is_unauthorized() {
        let resp = app("")
            .oneshot(multipart_request("/api/upload?path=/", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn traversal_in_path_is_bad_request() {
        let resp = app("t")
            .oneshot(multipart_request("/api/upload?path=/a/../b", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn streams_progress_then_outcome() {
        let (base, mut seen) = mock_drive(DriveScript::default()).await;
        let resp = drive_app(&base, UploadConfig::default())
            .oneshot(multipart_request("/api/upload?path=/docs", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );

        let body = body_text(resp).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3, "{body}");
        assert_eq!(lines[0], "Starting upload of a.txt to /docs");
        assert_eq!(lines[1], "Progress: 100.00%");
        let outcome: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(
            outcome,
            serde_json::json!({
                "status": "completed",
                "id": "NEWID",
                "path": "docs/a.txt",
                "size": 5,
            })
        );

        assert_eq!(
            drain(&mut seen),
            vec![
                "GET /me/drive/root:/docs/a.txt",
                "PUT /me/drive/root:/docs/a.txt:/content",
            ]
        );
    }

    #[tokio::test]
    async fn silent_upload_sends_only_outcome() {
        let (base, _seen) = mock_drive(DriveScript::default()).await;
        let resp = drive_app(&base, two_byte_chunks())
            .oneshot(multipart_request(
                "/api/upload?path=/docs&silent=true",
                Some("secret"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_text(resp).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 1, "{body}");
        let outcome: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(outcome["status"], "completed");
        assert_eq!(outcome["id"], "NEWID");
    }

    #[tokio::test]
    async fn existing_file_is_conflict() {
        let (base, mut seen) = mock_drive(DriveScript {
            exists: true,
            ..Default::default()
        })
        .await;
        let resp = drive_app(&base, UploadConfig::default())
            .oneshot(multipart_request("/api/upload?path=/docs", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(
            error_message(resp).await,
            "File already exists in the destination folder"
        );
        assert_eq!(drain(&mut seen), vec!["GET /me/drive/root:/docs/a.txt"]);
    }

    #[tokio::test]
    async fn dropped_response_cancels_upload() {
        let gate = Arc::new(Notify::new());
        let (base, mut seen) = mock_drive(DriveScript {
            gate: Some(gate.clone()),
            ..Default::default()
        })
        .await;
        let resp = drive_app(&base, two_byte_chunks())
            .oneshot(multipart_request("/api/upload?path=/docs", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(next_request(&mut seen).await, "GET /me/drive/root:/docs/a.txt");
        assert_eq!(
            next_request(&mut seen).await,
            "POST /me/drive/root:/docs/a.txt:/createUploadSession"
        );
        assert_eq!(next_request(&mut seen).await, "PUT /session");

        // Client goes away while the first chunk is in flight.
        drop(resp);
        gate.notify_one();

        // The in-flight chunk completes, no further chunk is sent and the
        // session is discarded.
        assert_eq!(next_request(&mut seen).await, "DELETE /session");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(drain(&mut seen).is_empty());
    }
}
