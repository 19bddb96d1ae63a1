//! Resource loader coordinator.
//!
//! Accepts or declines loading requests, builds the outbound range request,
//! keeps the request -> task map and cancels tasks when the pipeline gives a
//! request up. All state is owned by one loader thread; see [`driver`] for the
//! thread and the cross-thread handle.

pub mod driver;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::auth::{AuthChallenge, ChallengeOutcome, ClientCertHandler};
use crate::error::{report_violation, InvariantViolation, LoadError};
use crate::request::{LoadingRequest, RequestId};
use crate::router::{ResponseRouter, RouterAction};
use crate::scheme::{transform_url_scheme_with, CUSTOM_SCHEME_PREFIX};
use crate::transport::{OutboundRequest, TaskId, Transport, TransportError, TransportEvent};

pub use self::driver::{LoaderHandle, LoaderRuntime};

/// Coordinator settings that shape every outbound request.
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub scheme_prefix: String,
    /// Sent with every request, before `Range`.
    pub extra_headers: Vec<(String, String)>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            scheme_prefix: CUSTOM_SCHEME_PREFIX.to_string(),
            extra_headers: Vec::new(),
        }
    }
}

/// The outbound shape of an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRequest {
    /// Unmarked http(s) URL.
    pub url: String,
    pub range: String,
    pub host: Option<String>,
    pub https: bool,
}

/// Decides whether `request` can be loaded and what to send for it.
///
/// `None` when the request has no data window, the window is empty, or the
/// unmarked URL is not http(s).
pub fn plan_request(request: &dyn LoadingRequest, scheme_prefix: &str) -> Option<PlannedRequest> {
    let Some(window) = request.data_range() else {
        tracing::debug!(request = %request.id(), "bad data request");
        return None;
    };
    let Some(range) = window.range_header_value() else {
        tracing::debug!(request = %request.id(), "empty byte range");
        return None;
    };
    let url = transform_url_scheme_with(request.url(), scheme_prefix);
    let parsed = match Url::parse(&url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => u,
        _ => {
            tracing::debug!(request = %request.id(), url = %request.url(), "not a loadable url");
            return None;
        }
    };
    Some(PlannedRequest {
        https: parsed.scheme() == "https",
        host: parsed.host_str().map(str::to_string),
        url,
        range,
    })
}

/// Session-level challenges are never answered here; the transport's
/// default handling applies.
pub fn session_challenge(challenge: &AuthChallenge) -> ChallengeOutcome {
    tracing::debug!(host = %challenge.host, "default session auth challenge handling");
    ChallengeOutcome::Deferred
}

/// Result of a pipeline cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was asked to stop; its completion finishes the request.
    Cancelled,
    /// The request had already finished; nothing to do.
    AlreadyFinished,
}

/// Single-threaded coordinator over a [`Transport`].
pub struct ResourceLoader<T: Transport> {
    transport: T,
    router: ResponseRouter,
    settings: LoaderSettings,
    /// Request -> task for every live request the pipeline has not cancelled.
    requests: HashMap<RequestId, TaskId>,
}

impl<T: Transport> ResourceLoader<T> {
    pub fn new(transport: T, settings: LoaderSettings, challenge_handler: Option<ClientCertHandler>) -> Self {
        Self {
            transport,
            router: ResponseRouter::new(challenge_handler),
            settings,
            requests: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn router(&self) -> &ResponseRouter {
        &self.router
    }

    /// Number of requests with a live, uncancelled task.
    pub fn live_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn task_for(&self, request: RequestId) -> Option<TaskId> {
        self.requests.get(&request).copied()
    }

    /// Nothing registered and nothing running.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.router.registry().is_empty() && self.transport.active_tasks() == 0
    }

    /// Accepts the request and starts a task for it, or declines it.
    ///
    /// `Ok(false)` leaves the request untouched; the caller owns finishing it.
    pub fn should_load(&mut self, request: Arc<dyn LoadingRequest>) -> Result<bool, InvariantViolation> {
        let id = request.id();
        tracing::debug!(
            request = %id,
            content_info = request.wants_content_info(),
            range = ?request.data_range(),
            "should load"
        );
        if self.requests.contains_key(&id) {
            return Err(InvariantViolation::DuplicateRequest(id));
        }
        let Some(plan) = plan_request(request.as_ref(), &self.settings.scheme_prefix) else {
            return Ok(false);
        };

        let credential = match (&plan.host, plan.https) {
            (Some(host), true) => {
                let challenge = self.router.challenge_for(host);
                self.router.on_task_challenge(&challenge).credential()
            }
            _ => None,
        };

        let mut headers = self.settings.extra_headers.clone();
        headers.push(("Range".to_string(), plan.range.clone()));
        let outbound = OutboundRequest {
            url: plan.url.clone(),
            headers,
            credential,
        };

        let task = match self.transport.create_task(outbound) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(request = %id, url = %plan.url, error = %e, "could not create task");
                return Ok(false);
            }
        };
        self.router.register(task, Arc::clone(&request), plan.host)?;
        self.requests.insert(id, task);
        tracing::debug!(request = %id, %task, range = %plan.range, "requesting range");

        if let Err(e) = self.transport.resume(task) {
            tracing::warn!(request = %id, %task, error = %e, "could not start task");
            self.requests.remove(&id);
            let action = self.router.reject(task, LoadError::Transport(e.to_string()))?;
            self.apply(action);
        }
        Ok(true)
    }

    /// The pipeline gave up on `request`.
    ///
    /// The map entry goes away now; the registry entry stays until the
    /// transport reports the task complete, which finishes the request as
    /// cancelled. A second cancel for the same unfinished request is a
    /// violation.
    pub fn cancel(&mut self, request: &dyn LoadingRequest) -> Result<CancelOutcome, InvariantViolation> {
        let id = request.id();
        match self.requests.remove(&id) {
            Some(task) => {
                self.router.mark_cancel_requested(task)?;
                self.transport.cancel(task);
                tracing::debug!(request = %id, %task, remaining = self.requests.len(), "cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            None if request.is_finished() => {
                tracing::debug!(request = %id, "cancel for finished request ignored");
                Ok(CancelOutcome::AlreadyFinished)
            }
            None => Err(InvariantViolation::MissingRequest(id)),
        }
    }

    /// Resource renewal is not part of this loader.
    pub fn should_renew(&self, _request: &dyn LoadingRequest) -> Result<bool, InvariantViolation> {
        Err(InvariantViolation::RenewalUnsupported)
    }

    pub fn session_challenge(&self, challenge: &AuthChallenge) -> ChallengeOutcome {
        session_challenge(challenge)
    }

    /// Routes one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), InvariantViolation> {
        let action = self.router.handle(event)?;
        self.apply(action);
        Ok(())
    }

    fn apply(&mut self, action: RouterAction) {
        match action {
            RouterAction::None => {}
            RouterAction::CancelTask(task) => self.transport.cancel(task),
            RouterAction::Completed(done) => {
                if self.requests.get(&done.request) == Some(&done.task) {
                    self.requests.remove(&done.request);
                }
            }
        }
    }

    /// Polls the transport once and routes what it reports.
    ///
    /// Violations are reported and do not stop the loop.
    pub fn process_events(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let events = self.transport.poll_events(timeout)?;
        let count = events.len();
        for event in events {
            if let Err(violation) = self.handle_event(event) {
                report_violation(&violation);
            }
        }
        Ok(count)
    }

    /// Cancels every live task, as if the pipeline had cancelled each request.
    pub fn cancel_all(&mut self) {
        for (request, task) in self.requests.drain() {
            tracing::debug!(%request, %task, "cancelling on shutdown");
            if let Err(violation) = self.router.mark_cancel_requested(task) {
                report_violation(&violation);
            }
            self.transport.cancel(task);
        }
    }

    /// Fails every request still in the registry with `error` and cancels its task.
    pub fn fail_all(&mut self, error: &TransportError) {
        self.requests.clear();
        let tasks: Vec<TaskId> = self.router.registry().entries().map(|(task, _, _)| task).collect();
        for task in tasks {
            match self.router.reject(task, LoadError::Transport(error.to_string())) {
                Ok(action) => self.apply(action),
                Err(violation) => report_violation(&violation),
            }
        }
    }

    /// Cancels everything and drains the transport until the registry is empty
    /// or `max_polls` polls have passed. Returns true when fully drained.
    pub fn shutdown(&mut self, poll_timeout: Duration, max_polls: usize) -> bool {
        self.cancel_all();
        for _ in 0..max_polls {
            if self.router.registry().is_empty() {
                break;
            }
            if let Err(e) = self.process_events(poll_timeout) {
                tracing::warn!(error = %e, "transport error while draining");
                break;
            }
        }
        let drained = self.router.registry().is_empty();
        if !drained {
            tracing::warn!(left = self.router.registry().len(), "tasks left at shutdown");
        }
        drained
    }

    /// Cross-checks the request map against the registry.
    pub fn check_consistency(&self) -> Result<(), String> {
        let registry = self.router.registry();
        for (request, task) in &self.requests {
            let Some(state) = registry.get(*task) else {
                return Err(format!("request {} maps to unregistered task {}", request, task));
            };
            if state.request.id() != *request {
                return Err(format!(
                    "task {} belongs to {}, map says {}",
                    task,
                    state.request.id(),
                    request
                ));
            }
            if state.cancel_requested {
                return Err(format!("cancelled task {} still mapped", task));
            }
        }
        for (task, request, cancel_requested) in registry.entries() {
            if !cancel_requested && self.requests.get(&request) != Some(&task) {
                // A request whose task could not start is rejected and unmapped
                // before the transport confirms.
                let finished = registry.get(task).map(|s| s.request.is_finished()).unwrap_or(false);
                if !finished {
                    return Err(format!("live task {} for {} has no map entry", task, request));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
