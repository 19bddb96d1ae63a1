//! Streaming task registry: which task serves which loading request, and how
//! many bytes it has delivered.
//!
//! Entries are created when a task is issued and removed exactly once, when
//! the transport reports the task complete (successfully, with an error, or
//! cancelled). Only the loader thread touches the registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InvariantViolation, LoadError};
use crate::headers::content_type_identifier;
use crate::request::{ContentInfo, LoadOutcome, LoadingRequest, RequestId};
use crate::transport::{TaskId, TransportError};

/// Bookkeeping for one live task.
pub struct TaskState {
    pub request: Arc<dyn LoadingRequest>,
    /// Bytes forwarded to the request so far.
    pub bytes_received: u64,
    /// Content type identifier derived from the response, once headers arrived.
    pub content_type: Option<String>,
    /// The pipeline asked to cancel; completion is still outstanding.
    pub cancel_requested: bool,
}

/// What to tell the transport after a response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDecision {
    Allow,
    /// Cancel the task; the request has already been finished with this error.
    Reject(LoadError),
}

/// Summary of a task removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub task: TaskId,
    pub request: RequestId,
    pub bytes_received: u64,
    /// Outcome the request was finished with here; `None` if it was already finished.
    pub outcome: Option<LoadOutcome>,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fresh entry: zero bytes, no content type.
    pub fn register(
        &mut self,
        task: TaskId,
        request: Arc<dyn LoadingRequest>,
    ) -> Result<(), InvariantViolation> {
        if self.tasks.contains_key(&task) {
            return Err(InvariantViolation::DuplicateTask(task));
        }
        tracing::debug!(%task, request = %request.id(), "registered task");
        self.tasks.insert(
            task,
            TaskState {
                request,
                bytes_received: 0,
                content_type: None,
                cancel_requested: false,
            },
        );
        Ok(())
    }

    /// Forwards a chunk to the request's data sink and counts it.
    ///
    /// Chunks that arrive after the request was finished (a rejected response
    /// whose cancellation has not completed yet) are dropped.
    pub fn on_data(&mut self, task: TaskId, chunk: &[u8]) -> Result<(), InvariantViolation> {
        let state = self
            .tasks
            .get_mut(&task)
            .ok_or(InvariantViolation::UnknownTask(task))?;
        if state.request.is_finished() {
            tracing::trace!(%task, len = chunk.len(), "dropping data for finished request");
            return Ok(());
        }
        state.request.respond_with(chunk);
        state.bytes_received += chunk.len() as u64;
        tracing::trace!(%task, len = chunk.len(), total = state.bytes_received, "data");
        Ok(())
    }

    /// Validates a response head and fills content information.
    ///
    /// A status outside 2xx or a missing content type finishes the request with
    /// an error and asks for the task to be cancelled. Status is checked first.
    pub fn on_headers(
        &mut self,
        task: TaskId,
        status: Option<u32>,
        content_type: Option<&str>,
        accepts_byte_ranges: bool,
        total_length: Option<u64>,
    ) -> Result<HeaderDecision, InvariantViolation> {
        let state = self
            .tasks
            .get_mut(&task)
            .ok_or(InvariantViolation::UnknownTask(task))?;

        let code = status.unwrap_or(0);
        if !(200..=299).contains(&code) {
            tracing::debug!(%task, status = code, "bad status");
            return self.reject(task, LoadError::BadStatus(code));
        }
        let Some(mime) = content_type else {
            tracing::debug!(%task, "no mime type");
            return self.reject(task, LoadError::MissingContentType);
        };

        let identifier = content_type_identifier(mime);
        state.content_type = Some(identifier.clone());

        let request = &state.request;
        if request.wants_content_info() {
            if request.has_content_info() {
                return Err(InvariantViolation::ContentInfoAlreadySet(request.id()));
            }
            let info = ContentInfo {
                content_type: identifier,
                content_length: total_length,
                byte_range_access_supported: accepts_byte_ranges,
            };
            tracing::debug!(
                %task,
                status = code,
                content_type = %info.content_type,
                content_length = ?info.content_length,
                byte_ranges = info.byte_range_access_supported,
                "content information"
            );
            request.set_content_info(info);
        } else {
            tracing::debug!(%task, status = code, "data request");
        }
        Ok(HeaderDecision::Allow)
    }

    /// Finishes the task's request with `error` (unless already finished) and
    /// asks for the task to be cancelled.
    pub fn reject(
        &mut self,
        task: TaskId,
        error: LoadError,
    ) -> Result<HeaderDecision, InvariantViolation> {
        let state = self
            .tasks
            .get(&task)
            .ok_or(InvariantViolation::UnknownTask(task))?;
        if !state.request.is_finished() {
            tracing::warn!(%task, request = %state.request.id(), %error, "rejecting response");
            state.request.finish(LoadOutcome::Failed(error.clone()));
        }
        Ok(HeaderDecision::Reject(error))
    }

    /// Records that the pipeline cancelled the task's request.
    pub fn mark_cancel_requested(&mut self, task: TaskId) -> Result<(), InvariantViolation> {
        let state = self
            .tasks
            .get_mut(&task)
            .ok_or(InvariantViolation::UnknownTask(task))?;
        state.cancel_requested = true;
        Ok(())
    }

    /// Removes the entry and finishes its request if nobody has yet.
    ///
    /// A `Cancelled` error finishes the request as cancelled, which is not a
    /// failure. Any other error on an unfinished request is unexpected and is
    /// logged loudly before the request fails with it.
    pub fn on_complete(
        &mut self,
        task: TaskId,
        error: Option<&TransportError>,
    ) -> Result<Completion, InvariantViolation> {
        let state = self
            .tasks
            .remove(&task)
            .ok_or(InvariantViolation::UnknownTask(task))?;
        let request = state.request;
        let received = state.bytes_received;

        match error {
            Some(e) => tracing::debug!(%task, error = %e, received, "task ended with error"),
            None => tracing::debug!(%task, received, "complete"),
        }
        tracing::debug!(%task, content_type = ?state.content_type, "content type");

        let outcome = if request.is_finished() {
            None
        } else {
            let outcome = match error {
                None => LoadOutcome::Complete,
                Some(e) if e.is_cancelled() => LoadOutcome::Cancelled,
                Some(e) => {
                    tracing::error!(%task, request = %request.id(), error = %e, "unexpected transport error");
                    LoadOutcome::Failed(LoadError::Transport(e.to_string()))
                }
            };
            request.finish(outcome.clone());
            Some(outcome)
        };

        Ok(Completion {
            task,
            request: request.id(),
            bytes_received: received,
            outcome,
        })
    }

    pub fn get(&self, task: TaskId) -> Option<&TaskState> {
        self.tasks.get(&task)
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.contains_key(&task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Live entries as `(task, request, cancel_requested)`.
    pub fn entries(&self) -> impl Iterator<Item = (TaskId, RequestId, bool)> + '_ {
        self.tasks
            .iter()
            .map(|(task, state)| (*task, state.request.id(), state.cancel_requested))
    }
}
