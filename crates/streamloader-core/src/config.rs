use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ClientCertHandler;
use crate::identity::{import_from_container, Identity, IdentityStore, MemoryIdentityStore};
use crate::loader::LoaderSettings;
use crate::scheme::CUSTOM_SCHEME_PREFIX;
use crate::transport::CurlOptions;

/// Client identity used to answer client-certificate challenges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// PKCS#12 (`.p12` / `.pfx`) file.
    pub path: PathBuf,
    #[serde(default)]
    pub passphrase: String,
    /// Server hostname this identity is stored under. Unset offers it to every host.
    #[serde(default)]
    pub label: Option<String>,
}

/// Global configuration loaded from `~/.config/streamloader/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Scheme prefix marking URLs for the custom loader.
    pub scheme_prefix: String,
    /// How long the idle loader thread waits for commands, and the transport for activity.
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Abort a transfer slower than this many bytes/s for `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    pub timeout_secs: u64,
    pub max_redirections: u32,
    /// Optional receive cap in bytes per second (None = no cap).
    pub max_recv_speed: Option<u64>,
    /// Optional curl receive buffer size in bytes (None = library default).
    pub buffer_size: Option<usize>,
    /// Extra headers sent with every range request (auth tokens, user agent).
    pub headers: BTreeMap<String, String>,
    pub identity: Option<IdentityConfig>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            scheme_prefix: CUSTOM_SCHEME_PREFIX.to_string(),
            poll_interval_ms: 100,
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            timeout_secs: 3600,
            max_redirections: 10,
            max_recv_speed: None,
            buffer_size: None,
            headers: BTreeMap::new(),
            identity: None,
        }
    }
}

impl LoaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn curl_options(&self) -> CurlOptions {
        CurlOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            low_speed_limit: self.low_speed_limit,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            max_redirections: self.max_redirections,
            max_recv_speed: self.max_recv_speed,
            buffer_size: self.buffer_size,
        }
    }

    pub fn settings(&self) -> LoaderSettings {
        LoaderSettings {
            scheme_prefix: self.scheme_prefix.clone(),
            extra_headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Loads the configured identity, if any, into a challenge handler.
    ///
    /// With a `label` the identity is stored under that hostname and only
    /// offered to it. A configured identity that cannot be read or imported
    /// is an error; no identity configured gives `Ok(None)`.
    pub fn client_cert_handler(&self) -> Result<Option<ClientCertHandler>> {
        let Some(cfg) = &self.identity else {
            return Ok(None);
        };
        match cfg.label.as_deref() {
            Some(host) => {
                let store = Arc::new(MemoryIdentityStore::new());
                load_identity_into(store.as_ref(), host, &cfg.path, &cfg.passphrase)?;
                Ok(Some(ClientCertHandler::with_store(store)))
            }
            None => {
                let identity = read_identity(&cfg.path, &cfg.passphrase)?;
                Ok(Some(ClientCertHandler::new(Some(identity))))
            }
        }
    }
}

fn read_identity(path: &Path, passphrase: &str) -> Result<Identity> {
    let bytes = fs::read(path).with_context(|| format!("read identity {}", path.display()))?;
    import_from_container(&bytes, passphrase).with_context(|| {
        format!(
            "{} is not a PKCS#12 container this passphrase opens",
            path.display()
        )
    })
}

/// Reads a PKCS#12 file and stores it under `label`.
pub fn load_identity_into(
    store: &dyn IdentityStore,
    label: &str,
    path: &Path,
    passphrase: &str,
) -> Result<()> {
    let identity = read_identity(path, passphrase)?;
    store.store_identity(label, identity)?;
    Ok(())
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("streamloader")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<LoaderConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = LoaderConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

pub fn load_from(path: &Path) -> Result<LoaderConfig> {
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoaderConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
