//! Drive API client for path-addressed items and resumable upload sessions.
//!
//! Speaks the Microsoft Graph `driveItem` upload protocol: direct content
//! PUTs for small files and `createUploadSession` plus ranged chunk PUTs
//! for everything else.

pub mod client;
pub mod types;

pub use client::{Client, Error};
pub use types::{
    ByteRange, ChunkResponse, ConflictBehavior, ContentRange, DriveItem, UploadSessionInfo,
};
