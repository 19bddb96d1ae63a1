//! Network response router: turns transport events into registry operations
//! and tells the coordinator what to do with the task afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{AuthChallenge, ChallengeOutcome, ClientCertHandler};
use crate::error::{InvariantViolation, LoadError};
use crate::headers::{parse_content_range_total, ResponseHead};
use crate::registry::{Completion, HeaderDecision, TaskRegistry};
use crate::request::LoadingRequest;
use crate::transport::{TaskId, TransportError, TransportEvent};

/// Follow-up the coordinator applies after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    None,
    /// The response was rejected; cancel the task at the transport.
    CancelTask(TaskId),
    /// The task is gone from the registry.
    Completed(Completion),
}

pub struct ResponseRouter {
    registry: TaskRegistry,
    challenge_handler: Option<ClientCertHandler>,
    /// Host each live task talks to, for TLS failure accounting.
    task_hosts: HashMap<TaskId, String>,
    /// TLS handshake failures per host since the last success.
    tls_failures: HashMap<String, u32>,
}

impl ResponseRouter {
    pub fn new(challenge_handler: Option<ClientCertHandler>) -> Self {
        Self {
            registry: TaskRegistry::new(),
            challenge_handler,
            task_hosts: HashMap::new(),
            tls_failures: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn register(
        &mut self,
        task: TaskId,
        request: Arc<dyn LoadingRequest>,
        host: Option<String>,
    ) -> Result<(), InvariantViolation> {
        self.registry.register(task, request)?;
        if let Some(host) = host {
            self.task_hosts.insert(task, host);
        }
        Ok(())
    }

    pub fn mark_cancel_requested(&mut self, task: TaskId) -> Result<(), InvariantViolation> {
        self.registry.mark_cancel_requested(task)
    }

    /// Fails the task's request with `error` and asks for cancellation.
    pub fn reject(&mut self, task: TaskId, error: LoadError) -> Result<RouterAction, InvariantViolation> {
        self.registry.reject(task, error)?;
        Ok(RouterAction::CancelTask(task))
    }

    pub fn handle(&mut self, event: TransportEvent) -> Result<RouterAction, InvariantViolation> {
        match event {
            TransportEvent::Response { task, head } => self.on_response(task, &head),
            TransportEvent::Data { task, chunk } => {
                self.registry.on_data(task, &chunk)?;
                Ok(RouterAction::None)
            }
            TransportEvent::Complete { task, error } => self.on_complete(task, error.as_ref()),
        }
    }

    fn on_response(&mut self, task: TaskId, head: &ResponseHead) -> Result<RouterAction, InvariantViolation> {
        let wants_info = self
            .registry
            .get(task)
            .map(|state| state.request.wants_content_info())
            .ok_or(InvariantViolation::UnknownTask(task))?;

        // Status and content type are judged first by the registry; a bad
        // Content-Range only matters on an otherwise acceptable metadata response.
        if wants_info && head.is_success() && head.mime_type.is_some() {
            if let Some(cr) = head.content_range.as_deref() {
                if parse_content_range_total(cr).is_none() {
                    return self.reject(task, LoadError::InvalidContentRange(cr.to_string()));
                }
            }
        }

        let decision = self.registry.on_headers(
            task,
            head.status,
            head.mime_type.as_deref(),
            head.accepts_byte_ranges,
            head.total_length(),
        )?;
        Ok(match decision {
            HeaderDecision::Allow => RouterAction::None,
            HeaderDecision::Reject(_) => RouterAction::CancelTask(task),
        })
    }

    fn on_complete(
        &mut self,
        task: TaskId,
        error: Option<&TransportError>,
    ) -> Result<RouterAction, InvariantViolation> {
        let completion = self.registry.on_complete(task, error)?;
        if let Some(host) = self.task_hosts.remove(&task) {
            match error {
                Some(e) if e.is_tls() => {
                    let failures = self.tls_failures.entry(host.clone()).or_insert(0);
                    *failures += 1;
                    tracing::debug!(%host, failures = *failures, "tls handshake failed");
                }
                None => {
                    self.tls_failures.remove(&host);
                }
                Some(_) => {}
            }
        }
        Ok(RouterAction::Completed(completion))
    }

    /// Client-certificate challenge for a new task against `host`.
    pub fn challenge_for(&self, host: &str) -> AuthChallenge {
        let failures = self.tls_failures.get(host).copied().unwrap_or(0);
        AuthChallenge::client_certificate(host, failures)
    }

    /// Per-task challenge: delegates to the configured handler, otherwise defers.
    pub fn on_task_challenge(&self, challenge: &AuthChallenge) -> ChallengeOutcome {
        match &self.challenge_handler {
            Some(handler) => {
                let outcome = handler.handle(challenge);
                if outcome.is_deferred() {
                    tracing::debug!(host = %challenge.host, "default auth challenge handling");
                } else {
                    tracing::debug!(host = %challenge.host, "handled auth challenge");
                }
                outcome
            }
            None => {
                tracing::debug!(host = %challenge.host, "default auth challenge handling");
                ChallengeOutcome::Deferred
            }
        }
    }
}
