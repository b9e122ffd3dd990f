//! Remote drive seam.

use std::future::Future;
use std::pin::Pin;

use driveup_graph::{
    ChunkResponse, Client, ConflictBehavior, ContentRange, DriveItem, UploadSessionInfo,
};

/// Boxed future returned by [`DriveApi`] methods.
pub type ApiFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, driveup_graph::Error>> + Send + 'a>>;

/// Remote operations the upload engine needs.
///
/// Implemented for [`driveup_graph::Client`]; tests supply an in-memory drive.
pub trait DriveApi: Send + Sync {
    /// Uploads a whole file in one request.
    fn put_content<'a>(
        &'a self,
        path: &'a str,
        mime_type: &'a str,
        data: Vec<u8>,
    ) -> ApiFuture<'a, DriveItem>;

    /// Opens an upload session.
    fn create_upload_session<'a>(
        &'a self,
        path: &'a str,
        file_name: &'a str,
        conflict_behavior: ConflictBehavior,
    ) -> ApiFuture<'a, UploadSessionInfo>;

    /// Sends one byte range to a session.
    fn put_chunk<'a>(
        &'a self,
        upload_url: &'a str,
        range: ContentRange,
        mime_type: &'a str,
        data: Vec<u8>,
    ) -> ApiFuture<'a, ChunkResponse>;

    /// Asks a session which ranges it still expects.
    fn upload_status<'a>(&'a self, upload_url: &'a str) -> ApiFuture<'a, UploadSessionInfo>;

    /// Discards a session.
    fn delete_upload_session<'a>(&'a self, upload_url: &'a str) -> ApiFuture<'a, ()>;

    /// Fetches item metadata by path.
    fn get_item<'a>(&'a self, path: &'a str) -> ApiFuture<'a, Option<DriveItem>>;
}

impl DriveApi for Client {
    fn put_content<'a>(
        &'a self,
        path: &'a str,
        mime_type: &'a str,
        data: Vec<u8>,
    ) -> ApiFuture<'a, DriveItem> {
        Box::pin(Client::put_content(self, path, mime_type, data))
    }

    fn create_upload_session<'a>(
        &'a self,
        path: &'a str,
        file_name: &'a str,
        conflict_behavior: ConflictBehavior,
    ) -> ApiFuture<'a, UploadSessionInfo> {
        Box::pin(Client::create_upload_session(
            self,
            path,
            file_name,
            conflict_behavior,
        ))
    }

    fn put_chunk<'a>(
        &'a self,
        upload_url: &'a str,
        range: ContentRange,
        mime_type: &'a str,
        data: Vec<u8>,
    ) -> ApiFuture<'a, ChunkResponse> {
        Box::pin(Client::put_chunk(self, upload_url, range, mime_type, data))
    }

    fn upload_status<'a>(&'a self, upload_url: &'a str) -> ApiFuture<'a, UploadSessionInfo> {
        Box::pin(Client::upload_status(self, upload_url))
    }

    fn delete_upload_session<'a>(&'a self, upload_url: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(Client::delete_upload_session(self, upload_url))
    }

    fn get_item<'a>(&'a self, path: &'a str) -> ApiFuture<'a, Option<DriveItem>> {
        Box::pin(Client::get_item(self, path))
    }
}
