//! TLS client-certificate challenge handling.
//!
//! A challenge either gets a session-scoped credential built from the identity
//! for the challenging host (`Handled`) or falls through to the transport's
//! default behaviour (`Deferred`). The handler holds no per-challenge state.

use std::fmt;
use std::sync::Arc;

use crate::identity::{Identity, IdentityStore};

/// Kind of authentication a server is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ClientCertificate,
    ServerTrust,
    HttpBasic,
    Other,
}

/// One authentication challenge raised for a task or a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub method: AuthMethod,
    pub host: String,
    /// How many times this challenge has already failed for the host.
    pub previous_failure_count: u32,
}

impl AuthChallenge {
    pub fn client_certificate(host: impl Into<String>, previous_failure_count: u32) -> Self {
        Self {
            method: AuthMethod::ClientCertificate,
            host: host.into(),
            previous_failure_count,
        }
    }
}

/// Where a credential may be remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPersistence {
    /// Only for the current transport session; never written to a shared store.
    ForSession,
}

/// Credential answered to a client-certificate challenge.
#[derive(Debug, Clone)]
pub struct Credential {
    pub identity: Identity,
    pub persistence: CredentialPersistence,
}

/// Result of offering a challenge to a handler.
#[derive(Debug, Clone)]
pub enum ChallengeOutcome {
    Handled(Credential),
    /// Not handled here; the transport applies its default handling.
    Deferred,
}

impl ChallengeOutcome {
    pub fn credential(self) -> Option<Credential> {
        match self {
            ChallengeOutcome::Handled(c) => Some(c),
            ChallengeOutcome::Deferred => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ChallengeOutcome::Deferred)
    }
}

/// Answers client-certificate challenges.
///
/// Identities are looked up in the store by server hostname. A handler built
/// with `new` offers its one identity to every host.
#[derive(Clone, Default)]
pub struct ClientCertHandler {
    identity: Option<Identity>,
    store: Option<Arc<dyn IdentityStore>>,
}

impl fmt::Debug for ClientCertHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertHandler")
            .field("identity", &self.identity)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl ClientCertHandler {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity,
            store: None,
        }
    }

    /// Answers each challenge with the identity stored under its host.
    pub fn with_store(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            identity: None,
            store: Some(store),
        }
    }

    /// Identity offered to `host`: the stored one, else the shared one.
    pub fn identity_for(&self, host: &str) -> Option<Identity> {
        if let Some(found) = self.store.as_ref().and_then(|s| s.get_identity(host)) {
            return Some(found);
        }
        if self.identity.is_none() {
            tracing::debug!(host, "no stored identity for host");
        }
        self.identity.clone()
    }

    pub fn handle(&self, challenge: &AuthChallenge) -> ChallengeOutcome {
        tracing::trace!(method = ?challenge.method, host = %challenge.host, "auth challenge");
        if challenge.method != AuthMethod::ClientCertificate {
            tracing::trace!("not client auth");
            return ChallengeOutcome::Deferred;
        }
        if challenge.previous_failure_count > 0 {
            tracing::debug!(
                host = %challenge.host,
                failures = challenge.previous_failure_count,
                "previously failed"
            );
            return ChallengeOutcome::Deferred;
        }
        let Some(identity) = self.identity_for(&challenge.host) else {
            return ChallengeOutcome::Deferred;
        };
        tracing::trace!(host = %challenge.host, "handled");
        ChallengeOutcome::Handled(Credential {
            identity,
            persistence: CredentialPersistence::ForSession,
        })
    }
}
