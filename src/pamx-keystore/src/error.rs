//! Error types for keystore operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening a keystore.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Keystore file could not be read.
    #[error("Cannot read keystore {path}: {source}")]
    Io {
        /// Keystore path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// File is not a PKCS#12 structure.
    #[error("Invalid PKCS#12 data: {reason}")]
    InvalidFormat {
        /// Parser message.
        reason: String,
    },

    /// MAC check failed; the password does not unlock the keystore.
    #[error("Wrong keystore password")]
    WrongPassword,

    /// Keystore holds no certificate.
    #[error("Keystore contains no certificate")]
    NoCertificate,

    /// Keystore holds no private key.
    #[error("Keystore contains no private key")]
    NoPrivateKey,

    /// Key and certificate were rejected by the TLS stack.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

impl KeystoreError {
    /// Create an invalid-format error.
    #[must_use]
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}
