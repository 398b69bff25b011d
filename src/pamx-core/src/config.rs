//! Configuration for the vault client, reconciler, integrity gate and server.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! the `CSPM_CLIENT_HOME` environment variable. The resulting [`GateConfig`]
//! is passed explicitly to every component that needs it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Environment variable overriding the A2A client installation root.
pub const CLIENT_HOME_ENV: &str = "CSPM_CLIENT_HOME";

/// Default A2A client installation root.
#[cfg(windows)]
pub const DEFAULT_CLIENT_HOME: &str = "c:/cspm/cloakware";
/// Default A2A client installation root.
#[cfg(not(windows))]
pub const DEFAULT_CLIENT_HOME: &str = "/opt/cspm/cloakware";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// A2A client invocation.
    pub vault: VaultConfig,
    /// Database reconciliation.
    pub database: DatabaseConfig,
    /// Manifest gate.
    pub integrity: IntegrityConfig,
    /// HTTPS server.
    pub server: ServerConfig,
}

/// How the A2A client is located and invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Installation root of the A2A client.
    pub client_home: PathBuf,
    /// Explicit client executable, bypassing the `client_home` layout.
    pub client_path: Option<PathBuf>,
    /// Upper bound for a single client invocation.
    pub timeout_secs: u64,
    /// Attempts made by the secret resolver while the vault answers 401.
    pub unauthorized_retries: u32,
    /// Pause between 401 retries.
    pub unauthorized_backoff_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            client_home: PathBuf::from(DEFAULT_CLIENT_HOME),
            client_path: None,
            timeout_secs: 30,
            unauthorized_retries: 10,
            unauthorized_backoff_ms: 250,
        }
    }
}

impl VaultConfig {
    /// Client invocation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Pause between 401 retries.
    pub fn unauthorized_backoff(&self) -> Duration {
        Duration::from_millis(self.unauthorized_backoff_ms)
    }

    /// Resolved path of the client executable.
    ///
    /// 64-bit builds use `cspmclient/bin64/cspmclient64`, 32-bit builds
    /// `cspmclient/bin/cspmclient`.
    pub fn client_executable(&self) -> PathBuf {
        if let Some(path) = &self.client_path {
            return path.clone();
        }
        let base = self.client_home.join("cspmclient");
        if cfg!(target_pointer_width = "64") {
            base.join("bin64").join("cspmclient64")
        } else {
            base.join("bin").join("cspmclient")
        }
    }
}

/// Database credential reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Vault alias of the database account.
    pub alias: String,
    /// Expected `extensionType` of the credential (also the driver id).
    pub driver: String,
    /// Upper bound for one connection attempt.
    pub connect_timeout_secs: u64,
    /// Log passwords in clear text on reconciliation events.
    pub reveal_secrets: bool,
    /// Accept the server certificate without validation.
    pub trust_server_certificate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            alias: "mssql-hr".into(),
            driver: "mssql".into(),
            connect_timeout_secs: 15,
            reveal_secrets: false,
            trust_server_certificate: true,
        }
    }
}

impl DatabaseConfig {
    /// Connection attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Manifest gate inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Manifest file (`<sha256> *<path>` lines).
    pub manifest: PathBuf,
    /// Pinned SHA-256 of the manifest file.
    pub pinned_digest: Option<String>,
    /// Vault alias whose password holds the pinned digest.
    pub pinned_digest_alias: Option<String>,
    /// Read block size for digesting.
    pub chunk_size: usize,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("filelist.sha256"),
            pinned_digest: None,
            pinned_digest_alias: None,
            chunk_size: crate::security::file_integrity::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// HTTPS server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Directory served under `/hello`, `/favicon.ico` and `/static/`.
    pub content_root: PathBuf,
    /// PKCS#12 keystore holding the server key and certificate.
    pub keystore: PathBuf,
    /// Vault alias whose password unlocks the keystore.
    pub keystore_alias: String,
    /// Grace period for in-flight requests on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 7443,
            content_root: PathBuf::from("content"),
            keystore: PathBuf::from("Keystore/Python-WebServer.keystore"),
            keystore_alias: "Python-WebServer".into(),
            shutdown_grace_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, GateError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GateError::config(format!("Invalid listen address: {}", e)))
    }
}

impl GateConfig {
    /// Load configuration: defaults, then `path` if given, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, GateError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, GateError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| GateError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&data)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(data: &str) -> Result<Self, GateError> {
        toml::from_str(data).map_err(|e| GateError::config(format!("Cannot parse config: {}", e)))
    }

    /// Apply `CSPM_CLIENT_HOME` if set.
    pub fn apply_env(&mut self) {
        if let Some(home) = std::env::var_os(CLIENT_HOME_ENV) {
            if !home.is_empty() {
                tracing::debug!(client_home = ?home, "client home taken from {}", CLIENT_HOME_ENV);
                self.vault.client_home = PathBuf::from(home);
            }
        }
    }
}
