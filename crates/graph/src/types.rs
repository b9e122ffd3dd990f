//! Wire types for the drive API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::client::Error;

/// Metadata of a file in the drive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    /// Absent in some final-chunk acknowledgements.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<String>,
}

/// What the remote does when the target path already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    #[default]
    Replace,
    Fail,
    Rename,
}

/// Body of a `createUploadSession` request.
#[derive(Debug, Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub item: SessionItem<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionItem<'a> {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
    pub name: &'a str,
}

/// Upload session state, returned on creation, on status queries and on
/// accepted intermediate chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionInfo {
    /// Only present on creation.
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default)]
    pub expiration_date_time: Option<String>,
    /// Ranges the remote still expects, e.g. `["0-"]` or `["12345-55232", "77829-"]`.
    #[serde(default)]
    pub next_expected_ranges: Vec<String>,
}

impl UploadSessionInfo {
    /// Parses `next_expected_ranges`.
    pub fn expected_ranges(&self) -> Result<Vec<ByteRange>, Error> {
        self.next_expected_ranges
            .iter()
            .map(|r| r.parse())
            .collect()
    }
}

/// A byte range still expected by the remote. `end` is inclusive; `None`
/// means "through the end of the file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl FromStr for ByteRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidRange(s.to_string());
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.parse::<u64>().map_err(|_| invalid())?;
        let end = match end {
            "" => None,
            e => {
                let end = e.parse::<u64>().map_err(|_| invalid())?;
                if end < start {
                    return Err(invalid());
                }
                Some(end)
            }
        };
        Ok(Self { start, end })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}-", self.start),
        }
    }
}

/// Value of a chunk request's `Content-Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub len: u64,
    pub total: u64,
}

impl ContentRange {
    pub fn new(start: u64, len: u64, total: u64) -> Self {
        Self { start, len, total }
    }
}

/// Renders `bytes {start}-{end}/{total}` with an inclusive `end`.
impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = (self.start + self.len).saturating_sub(1);
        write!(f, "bytes {}-{}/{}", self.start, end, self.total)
    }
}

/// Successful response to a chunk PUT.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkResponse {
    /// 202: more bytes expected.
    Accepted { next_expected_ranges: Vec<ByteRange> },
    /// 200/201: the file is assembled.
    Completed(DriveItem),
}
