//! Loader thread and the handle the media pipeline talks to.
//!
//! The coordinator, its request map and the registry live on one thread. The
//! pipeline never touches them directly: it posts commands through a
//! [`LoaderHandle`] and the thread applies them between transport polls, so
//! every state change happens in one place.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use super::{plan_request, session_challenge, ResourceLoader, LoaderSettings};
use crate::auth::{AuthChallenge, ChallengeOutcome, ClientCertHandler};
use crate::config::LoaderConfig;
use crate::error::{report_violation, InvariantViolation, LoadError};
use crate::request::{LoadOutcome, LoadingRequest};
use crate::transport::{CurlTransport, Transport, TransportError};

/// Polls spent draining cancelled tasks at shutdown.
const SHUTDOWN_POLLS: usize = 50;

enum Command {
    Load(Arc<dyn LoadingRequest>),
    Cancel(Arc<dyn LoadingRequest>),
    Shutdown,
}

/// Cheap, cloneable entry point for the pipeline.
#[derive(Clone)]
pub struct LoaderHandle {
    tx: Sender<Command>,
    scheme_prefix: Arc<str>,
}

impl LoaderHandle {
    /// Returns true when the loader takes ownership of `request`.
    ///
    /// The answer is decided here from the request alone; the task itself is
    /// created on the loader thread. If that later fails, the request is
    /// finished with [`LoadError::Rejected`].
    pub fn should_load(&self, request: Arc<dyn LoadingRequest>) -> bool {
        if plan_request(request.as_ref(), &self.scheme_prefix).is_none() {
            return false;
        }
        self.tx.send(Command::Load(request)).is_ok()
    }

    pub fn cancel(&self, request: Arc<dyn LoadingRequest>) {
        if self.tx.send(Command::Cancel(request)).is_err() {
            tracing::debug!("cancel after loader shutdown ignored");
        }
    }

    pub fn session_challenge(&self, challenge: &AuthChallenge) -> ChallengeOutcome {
        session_challenge(challenge)
    }

    /// Renewal is not supported; reported as a violation and declined.
    pub fn should_renew(&self, _request: &dyn LoadingRequest) -> bool {
        report_violation(&InvariantViolation::RenewalUnsupported);
        false
    }

    /// Asks the loader thread to cancel everything and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Owns the loader thread.
pub struct LoaderRuntime {
    handle: LoaderHandle,
    thread: Option<JoinHandle<Result<(), TransportError>>>,
}

impl LoaderRuntime {
    /// Starts the loader thread. `make_transport` runs on that thread, so
    /// transports need not be `Send`.
    pub fn spawn<T, F>(
        settings: LoaderSettings,
        challenge_handler: Option<ClientCertHandler>,
        poll_interval: Duration,
        make_transport: F,
    ) -> Result<Self>
    where
        T: Transport + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = LoaderHandle {
            tx,
            scheme_prefix: Arc::from(settings.scheme_prefix.as_str()),
        };
        let thread = std::thread::Builder::new()
            .name("streamloader".into())
            .spawn(move || {
                let loader = ResourceLoader::new(make_transport(), settings, challenge_handler);
                run_loop(loader, rx, poll_interval)
            })
            .context("spawn loader thread")?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Starts the loader over libcurl with settings from `config`.
    pub fn with_config(config: &LoaderConfig) -> Result<Self> {
        let handler = config.client_cert_handler()?;
        let options = config.curl_options();
        Self::spawn(config.settings(), handler, config.poll_interval(), move || {
            CurlTransport::new(options)
        })
    }

    pub fn handle(&self) -> LoaderHandle {
        self.handle.clone()
    }

    /// Cancels everything in flight and waits for the thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.handle.shutdown();
        match thread.join() {
            Ok(result) => result.context("loader transport failed"),
            Err(_) => anyhow::bail!("loader thread panicked"),
        }
    }
}

impl Drop for LoaderRuntime {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "loader stopped with error");
        }
    }
}

fn run_loop<T: Transport>(
    mut loader: ResourceLoader<T>,
    rx: Receiver<Command>,
    poll_interval: Duration,
) -> Result<(), TransportError> {
    tracing::debug!("loader thread started");
    loop {
        let mut commands = Vec::new();
        if loader.is_idle() {
            match rx.recv_timeout(poll_interval) {
                Ok(command) => commands.push(command),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => commands.push(Command::Shutdown),
            }
        }
        loop {
            match rx.try_recv() {
                Ok(command) => commands.push(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    commands.push(Command::Shutdown);
                    break;
                }
            }
        }

        let mut shutdown = false;
        for command in commands {
            match command {
                Command::Load(request) => match loader.should_load(Arc::clone(&request)) {
                    Ok(true) => {}
                    Ok(false) => {
                        request.finish(LoadOutcome::Failed(LoadError::Rejected(
                            "no task could be created".into(),
                        )));
                    }
                    Err(violation) => report_violation(&violation),
                },
                Command::Cancel(request) => {
                    if let Err(violation) = loader.cancel(request.as_ref()) {
                        report_violation(&violation);
                    }
                }
                Command::Shutdown => shutdown = true,
            }
        }
        if shutdown {
            loader.shutdown(poll_interval, SHUTDOWN_POLLS);
            tracing::debug!("loader thread stopped");
            return Ok(());
        }

        if let Err(e) = loader.process_events(poll_interval) {
            tracing::error!(error = %e, "transport failed, failing live requests");
            loader.fail_all(&e);
            loader.shutdown(poll_interval, SHUTDOWN_POLLS);
            return Err(e);
        }
    }
}
