//! Error types for gate and startup operations.

use thiserror::Error;

use crate::security::manifest::IntegrityFailure;
use crate::types::VaultStatus;

/// Errors surfaced to the operator by the startup sequence and the CLI.
///
/// Vault problems inside the reconciliation protocol are not errors: they
/// travel as a [`VaultStatus`] on the credential document. This type covers
/// the failures that must stop a process from continuing.
#[derive(Debug, Error)]
pub enum GateError {
    /// File integrity verification failed - startup must not proceed.
    #[error("Integrity check failed: {0}")]
    Integrity(#[from] IntegrityFailure),

    /// The vault did not release a secret required for startup.
    #[error("Vault did not release '{alias}': status {status}")]
    VaultUnavailable {
        /// Alias that was requested.
        alias: String,
        /// Final status reported by the vault client.
        status: VaultStatus,
    },

    /// The database connection could not be established.
    #[error("Connection failed: {reason}")]
    Connection {
        /// Human-readable reason from the reconciler.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Keystore could not be opened.
    #[error("Keystore error: {0}")]
    Keystore(#[from] pamx_keystore::KeystoreError),

    /// HTTPS listener failed.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },
}

impl GateError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a server error.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Process exit code for this failure.
    ///
    /// Integrity failures get their own code so that service managers can
    /// distinguish tampering from an unreachable vault.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Integrity(_) => 3,
            Self::VaultUnavailable { .. } => 4,
            Self::Connection { .. } => 5,
            Self::Keystore(_) => 6,
            Self::Config { .. } => 2,
            Self::Server { .. } => 1,
        }
    }
}
