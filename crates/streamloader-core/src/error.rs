//! Error types shared by the registry, router and coordinator.

use crate::request::RequestId;
use crate::transport::TaskId;

/// Failure reported to the media pipeline through `LoadingRequest::finish`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// Response status outside 2xx (or no status line at all, reported as 0).
    #[error("bad status: HTTP {0}")]
    BadStatus(u32),
    /// Successful response without a usable `Content-Type`.
    #[error("response has no content type")]
    MissingContentType,
    /// `Content-Range` present on a content-information response but unparseable.
    #[error("unparseable Content-Range: {0}")]
    InvalidContentRange(String),
    /// Transport failed the task (connect, TLS, timeout, ...).
    #[error("transport: {0}")]
    Transport(String),
    /// The loader could not issue a task for the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// A broken happens-before contract between pipeline, transport and registry.
///
/// These are unreachable under correct usage. Core operations return them so
/// callers (and tests) can see them; the runtime logs and, in debug builds, panics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("task {0} registered twice")]
    DuplicateTask(TaskId),
    #[error("event for unknown task {0}")]
    UnknownTask(TaskId),
    #[error("request {0} already has a live task")]
    DuplicateRequest(RequestId),
    #[error("cancel for request {0} with no task, possible leak")]
    MissingRequest(RequestId),
    #[error("resource renewal is not supported")]
    RenewalUnsupported,
    #[error("content information for request {0} already set")]
    ContentInfoAlreadySet(RequestId),
}

/// Logs a violation and panics in debug builds.
pub fn report_violation(violation: &InvariantViolation) {
    tracing::error!(%violation, "loader invariant violated");
    if cfg!(debug_assertions) {
        panic!("loader invariant violated: {}", violation);
    }
}
