//! Client identities and where they come from.
//!
//! An identity is a PKCS#12 container (certificate + private key) and its
//! passphrase. Import decodes the container once to prove the passphrase
//! opens it; libcurl decodes it again during the handshake. Persistent
//! storage is someone else's job, so the store here is an interface plus an
//! in-memory implementation.

use openssl::pkcs12::Pkcs12;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Certificate + private key pair, opaque to the loader.
#[derive(Clone)]
pub struct Identity {
    pkcs12: Arc<Vec<u8>>,
    passphrase: String,
}

impl Identity {
    /// DER bytes of the PKCS#12 container.
    pub fn pkcs12(&self) -> &[u8] {
        &self.pkcs12
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("pkcs12_len", &self.pkcs12.len())
            .finish_non_exhaustive()
    }
}

/// Builds an identity from PKCS#12 DER bytes.
///
/// The container must decode with `passphrase` and hold both a certificate
/// and its private key. Failures are logged and yield `None`.
pub fn import_from_container(bytes: &[u8], passphrase: &str) -> Option<Identity> {
    if bytes.is_empty() {
        tracing::warn!("identity container is empty");
        return None;
    }
    let parsed = match Pkcs12::from_der(bytes).and_then(|p12| p12.parse2(passphrase)) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(len = bytes.len(), error = %e, "cannot decode identity container");
            return None;
        }
    };
    if parsed.pkey.is_none() || parsed.cert.is_none() {
        tracing::warn!(
            has_key = parsed.pkey.is_some(),
            has_cert = parsed.cert.is_some(),
            "identity container lacks a certificate and key pair"
        );
        return None;
    }
    tracing::debug!(len = bytes.len(), "imported identity container");
    Some(Identity {
        pkcs12: Arc::new(bytes.to_vec()),
        passphrase: passphrase.to_string(),
    })
}

/// Reads a `.p12`/`.pfx` file and imports it. Read errors are logged and yield `None`.
pub fn import_from_file(path: &Path, passphrase: &str) -> Option<Identity> {
    match std::fs::read(path) {
        Ok(bytes) => import_from_container(&bytes, passphrase),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read identity file");
            None
        }
    }
}

/// Error from an identity store write path.
#[derive(Debug, thiserror::Error)]
pub enum IdentityStoreError {
    #[error("no identity stored under {0}")]
    NotFound(String),
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed identity storage, typically keyed by server hostname.
pub trait IdentityStore: Send + Sync {
    fn get_identity(&self, label: &str) -> Option<Identity>;

    /// Stores (or replaces) the identity under `label`.
    fn store_identity(&self, label: &str, identity: Identity) -> Result<(), IdentityStoreError>;

    fn remove_identity(&self, label: &str) -> Result<(), IdentityStoreError>;
}

/// Process-local identity store.
#[derive(Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<String, Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get_identity(&self, label: &str) -> Option<Identity> {
        let found = self.identities.read().ok()?.get(label).cloned();
        tracing::trace!(label, found = found.is_some(), "identity lookup");
        found
    }

    fn store_identity(&self, label: &str, identity: Identity) -> Result<(), IdentityStoreError> {
        self.identities
            .write()
            .map_err(|e| IdentityStoreError::Unavailable(e.to_string()))?
            .insert(label.to_string(), identity);
        tracing::debug!(label, "stored identity");
        Ok(())
    }

    fn remove_identity(&self, label: &str) -> Result<(), IdentityStoreError> {
        self.identities
            .write()
            .map_err(|e| IdentityStoreError::Unavailable(e.to_string()))?
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| IdentityStoreError::NotFound(label.to_string()))
    }
}

/// PKCS#12 DER for a throwaway self-signed P-256 identity.
#[cfg(test)]
fn build_test_pkcs12(passphrase: &str) -> Vec<u8> {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::x509::{X509NameBuilder, X509};

    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let pkey = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "streamloader test client")
        .unwrap();
    let name = name.build();

    let mut cert = X509::builder().unwrap();
    cert.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    cert.set_serial_number(&serial).unwrap();
    cert.set_subject_name(&name).unwrap();
    cert.set_issuer_name(&name).unwrap();
    cert.set_pubkey(&pkey).unwrap();
    cert.set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    cert.set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    cert.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = cert.build();

    let mut builder = Pkcs12::builder();
    builder.name("streamloader test client");
    builder.pkey(&pkey);
    builder.cert(&cert);
    builder.build2(passphrase).unwrap().to_der().unwrap()
}

/// Shared test identity with passphrase "secret". Generated once per test binary.
#[cfg(test)]
pub(crate) fn test_identity() -> Identity {
    static DER: std::sync::OnceLock<Vec<u8>> = std::sync::OnceLock::new();
    let der = DER.get_or_init(|| build_test_pkcs12("secret"));
    import_from_container(der, "secret").expect("test identity")
}
