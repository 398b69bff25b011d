//! Credential retrieval through the A2A client.
//!
//! [`CredentialSource`] is the raw capability: "give me the client's answer
//! for this alias". [`CspmClient`] implements it by running the installed
//! `cspmclient` executable. [`CredentialBroker`] turns the answer into a
//! [`CredentialDocument`] and folds every failure into a status code, so
//! callers only ever inspect `document.status`.
//!
//! ## Client document
//!
//! ```xml
//! <CSPMResponse>
//!   <errorcode>400</errorcode>
//!   <credential>
//!     <TargetServer><hostName>db1.example.local</hostName></TargetServer>
//!     <TargetApplication>
//!       <extensionType>mssql</extensionType>
//!       <Attribute.port>1433</Attribute.port>
//!       <Attribute.instance>HR</Attribute.instance>
//!     </TargetApplication>
//!     <TargetAccount><userName>hr_app</userName><password>...</password></TargetAccount>
//!   </credential>
//! </CSPMResponse>
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, instrument, warn};

use crate::config::VaultConfig;
use crate::types::{CredentialDocument, TargetCredential, VaultStatus};

/// Output format flag asking the client for an XML document.
const XML_OUTPUT_FLAG: &str = "-x";

/// Errors from a credential source. Never escape the broker.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Client executable not present.
    #[error("A2A client not found at {path}")]
    ClientMissing {
        /// Path that was tried.
        path: PathBuf,
    },

    /// Client could not be started.
    #[error("Cannot start A2A client: {0}")]
    Spawn(#[from] std::io::Error),

    /// Client exited with a non-zero status.
    #[error("A2A client exited with {code:?}: {stderr}")]
    ExitStatus {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// Client did not finish in time.
    #[error("A2A client timed out after {0:?}")]
    Timeout(Duration),

    /// Client output is not UTF-8.
    #[error("A2A client output is not UTF-8")]
    InvalidOutput,
}

/// Anything that can answer a credential query for an alias.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Return the raw client document for `alias`.
    ///
    /// `bypass_cache` forces the client to ask the vault instead of
    /// answering from its local cache.
    async fn retrieve(&self, alias: &str, bypass_cache: bool) -> Result<String, SourceError>;
}

#[async_trait]
impl<T: CredentialSource + ?Sized> CredentialSource for &T {
    async fn retrieve(&self, alias: &str, bypass_cache: bool) -> Result<String, SourceError> {
        (**self).retrieve(alias, bypass_cache).await
    }
}

#[async_trait]
impl<T: CredentialSource + ?Sized> CredentialSource for Arc<T> {
    async fn retrieve(&self, alias: &str, bypass_cache: bool) -> Result<String, SourceError> {
        (**self).retrieve(alias, bypass_cache).await
    }
}

/// The installed A2A client, run as a subprocess.
#[derive(Debug, Clone)]
pub struct CspmClient {
    executable: PathBuf,
    timeout: Duration,
}

impl CspmClient {
    /// Client at an explicit path.
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
        }
    }

    /// Client located from configuration.
    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(config.client_executable(), config.timeout())
    }

    /// Path of the client executable.
    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }
}

#[async_trait]
impl CredentialSource for CspmClient {
    async fn retrieve(&self, alias: &str, bypass_cache: bool) -> Result<String, SourceError> {
        let mut command = Command::new(&self.executable);
        command
            .arg(alias)
            .arg(if bypass_cache { "true" } else { "false" })
            .arg(XML_OUTPUT_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::ClientMissing {
                    path: self.executable.clone(),
                });
            },
            Ok(Err(e)) => return Err(SourceError::Spawn(e)),
            Err(_) => return Err(SourceError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(SourceError::ExitStatus {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| SourceError::InvalidOutput)
    }
}

/// Turns client answers into typed credential documents.
pub struct CredentialBroker<S> {
    source: S,
    expected_type: Option<String>,
}

impl<S: CredentialSource> CredentialBroker<S> {
    /// Broker accepting any application type.
    pub fn new(source: S) -> Self {
        Self {
            source,
            expected_type: None,
        }
    }

    /// Only accept credentials whose `extensionType` equals `extension_type`.
    ///
    /// Other types are downgraded to [`VaultStatus::UnsupportedType`].
    pub fn expecting(mut self, extension_type: impl Into<String>) -> Self {
        self.expected_type = Some(extension_type.into());
        self
    }

    /// Expected application type, if any.
    pub fn expected_type(&self) -> Option<&str> {
        self.expected_type.as_deref()
    }

    /// Underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and decode the credential for `alias`.
    ///
    /// Never fails: client errors and unreadable output come back as a
    /// [`VaultStatus::GenericFailure`] document.
    #[instrument(skip(self), fields(expected_type = ?self.expected_type))]
    pub async fn fetch(&self, alias: &str, bypass_cache: bool) -> CredentialDocument {
        let raw = match self.source.retrieve(alias, bypass_cache).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(alias = %alias, bypass_cache, error = %e, "A2A client call failed");
                return CredentialDocument::generic_failure();
            },
        };

        let document = decode_document(&raw, self.expected_type.as_deref());
        debug!(
            alias = %alias,
            bypass_cache,
            status = %document.status,
            extension_type = ?document.extension_type,
            "A2A client answered"
        );
        document
    }
}

/// Decode a client document.
///
/// Anything that is not a well-formed answer becomes the `-1` sentinel.
pub fn decode_document(raw: &str, expected_type: Option<&str>) -> CredentialDocument {
    let raw = raw.trim();
    if raw.is_empty() {
        warn!("A2A client returned an empty document");
        return CredentialDocument::generic_failure();
    }

    let doc = match roxmltree::Document::parse(raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "A2A client returned malformed XML");
            return CredentialDocument::generic_failure();
        },
    };
    let root = doc.root_element();

    let Some(code) = find_text(root, "errorcode") else {
        warn!("A2A client document has no errorcode");
        return CredentialDocument::generic_failure();
    };

    let status = VaultStatus::from_wire(&code);
    if !status.is_success() {
        // Vault-level failure wins; no type matching on absent credential data.
        return CredentialDocument::failure(status);
    }

    let extension_type = find_text(root, "credential/TargetApplication/extensionType");
    if let Some(expected) = expected_type {
        let matches = extension_type
            .as_deref()
            .is_some_and(|actual| actual.eq_ignore_ascii_case(expected));
        if !matches {
            warn!(
                expected = %expected,
                actual = ?extension_type,
                "credential has unsupported extension type"
            );
            return CredentialDocument::unsupported_type(extension_type);
        }
    }

    match decode_target(root) {
        Some(target) => CredentialDocument::success(target, extension_type),
        None => CredentialDocument::generic_failure(),
    }
}

fn decode_target(root: roxmltree::Node<'_, '_>) -> Option<TargetCredential> {
    let Some(host) = find_text(root, "credential/TargetServer/hostName") else {
        warn!("success document without hostName");
        return None;
    };
    let Some(username) = find_text(root, "credential/TargetAccount/userName") else {
        warn!("success document without userName");
        return None;
    };
    // Passwords may legitimately contain leading/trailing blanks.
    let Some(password) = find_raw_text(root, "credential/TargetAccount/password") else {
        warn!("success document without password");
        return None;
    };

    let port = match find_text(root, "credential/TargetApplication/Attribute.port") {
        Some(port) => match port.parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!(port = %port, "success document with invalid port");
                return None;
            },
        },
        None => None,
    };

    Some(TargetCredential {
        host,
        port,
        instance_or_database: find_text(root, "credential/TargetApplication/Attribute.instance"),
        username,
        password: SecretString::from(password),
    })
}

/// Trimmed, non-empty text of the element at `path` below `node`.
fn find_text(node: roxmltree::Node<'_, '_>, path: &str) -> Option<String> {
    find_raw_text(node, path)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn find_raw_text(node: roxmltree::Node<'_, '_>, path: &str) -> Option<String> {
    let mut current = node;
    for segment in path.split('/') {
        current = current
            .children()
            .find(|child| child.is_element() && child.tag_name().name() == segment)?;
    }
    current
        .text()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
