//! Loading requests: the pipeline-owned handles the loader reads and completes.
//!
//! The loader never creates or destroys a request. It reads the target URL and
//! byte range, pushes metadata and bytes into it, and finishes it exactly once.

pub mod channel;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::LoadError;

pub use channel::{ChannelRequest, RequestEvent};

/// Identity of a loading request, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RequestId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Requested byte window of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    /// First byte wanted.
    pub offset: u64,
    /// Number of bytes wanted; `None` means up to the end of the resource.
    pub length: Option<u64>,
}

impl DataRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    pub fn to_end(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// `Range` header value (inclusive end), or `None` for an empty window.
    pub fn range_header_value(&self) -> Option<String> {
        match self.length {
            Some(0) => None,
            Some(len) => {
                let end = self.offset.checked_add(len - 1)?;
                Some(format!("bytes={}-{}", self.offset, end))
            }
            None => Some(format!("bytes={}-", self.offset)),
        }
    }
}

/// Resource metadata answered to a content-information request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentInfo {
    /// Content type identifier derived from the response MIME type.
    pub content_type: String,
    /// Total resource length, when the response revealed it.
    pub content_length: Option<u64>,
    /// True if the server advertised `Accept-Ranges: bytes`.
    pub byte_range_access_supported: bool,
}

/// Terminal state of a loading request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// All requested bytes were delivered.
    Complete,
    /// The pipeline (or shutdown) cancelled the request. Not a failure.
    Cancelled,
    /// Protocol or transport failure.
    Failed(LoadError),
}

impl LoadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, LoadOutcome::Failed(_))
    }
}

/// A player's pending request for metadata and/or a byte range of one resource.
///
/// Implementations are shared between the pipeline's thread and the loader
/// thread, so every method takes `&self`. The loader calls the mutating methods
/// only from its own thread.
pub trait LoadingRequest: Send + Sync {
    fn id(&self) -> RequestId;

    /// URL as the player sees it (scheme-marked).
    fn url(&self) -> &str;

    /// Byte window of the data request, if the request has one.
    fn data_range(&self) -> Option<DataRange>;

    /// True if the player wants content information filled in.
    fn wants_content_info(&self) -> bool;

    /// True once content information has been supplied.
    fn has_content_info(&self) -> bool;

    fn set_content_info(&self, info: ContentInfo);

    /// Data sink: hands one chunk to the player, in arrival order.
    fn respond_with(&self, chunk: &[u8]);

    fn is_finished(&self) -> bool;

    /// Terminal call; the loader makes it at most once per request.
    fn finish(&self, outcome: LoadOutcome);
}
