//! Network transport seam.
//!
//! A transport issues one task per outbound request and reports what happens
//! to it as discrete events, polled from the loader thread. For a given task
//! it delivers at most one `Response`, then `Data` in arrival order, then
//! exactly one `Complete`.

pub mod multi;

mod classify;
#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::time::Duration;

use crate::auth::Credential;
use crate::headers::ResponseHead;

pub use self::classify::classify_curl_error;
pub use self::multi::{CurlOptions, CurlTransport};

/// Identifier of one in-flight network task. Never reused by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Request handed to the transport: real (unmarked) URL, headers, optional client credential.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub credential: Option<Credential>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Lifecycle event of one task.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Final response headers arrived.
    Response { task: TaskId, head: ResponseHead },
    /// A body chunk arrived.
    Data { task: TaskId, chunk: Vec<u8> },
    /// The task ended; `None` means success.
    Complete {
        task: TaskId,
        error: Option<TransportError>,
    },
}

impl TransportEvent {
    pub fn task(&self) -> TaskId {
        match self {
            TransportEvent::Response { task, .. }
            | TransportEvent::Data { task, .. }
            | TransportEvent::Complete { task, .. } => *task,
        }
    }
}

/// Why a task ended early, or why the transport could not act.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Cancelled on request. Expected; the cancellation path finishes the request.
    #[error("cancelled")]
    Cancelled,
    /// Connect or transfer timed out.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Network-level failure (DNS, connect, reset).
    #[error("connection: {0}")]
    Connection(String),
    /// TLS handshake failure, including a rejected client certificate.
    #[error("tls: {0}")]
    Tls(String),
    /// The request could not be built (bad URL, bad header, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, TransportError::Tls(_))
    }
}

/// Issues and drives network tasks. Used from a single thread.
pub trait Transport {
    /// Creates a task for `request` without starting it.
    fn create_task(&mut self, request: OutboundRequest) -> Result<TaskId, TransportError>;

    /// Starts a created task.
    ///
    /// A task that fails to start still reports one `Complete` carrying the error.
    fn resume(&mut self, task: TaskId) -> Result<(), TransportError>;

    /// Stops a task. A live task later reports `Complete` with `Cancelled`;
    /// an unknown or finished task is ignored.
    fn cancel(&mut self, task: TaskId);

    /// Advances transfers, waiting up to `timeout` for activity, and returns
    /// the events that happened since the last poll.
    fn poll_events(&mut self, timeout: Duration) -> Result<Vec<TransportEvent>, TransportError>;

    /// Number of tasks not yet reported complete.
    fn active_tasks(&self) -> usize;
}
