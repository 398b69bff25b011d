//! Credential document types returned by the vault client.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

/// Wire code for a released credential.
pub const SUCCESS_CODE: &str = "400";
/// Wire code for a transient authorization refusal.
pub const UNAUTHORIZED_CODE: &str = "401";
/// Wire code for a credential of an unexpected application type.
pub const UNSUPPORTED_TYPE_CODE: &str = "415";
/// Wire code for any client-side failure (missing client, bad output, ...).
pub const GENERIC_FAILURE_CODE: &str = "-1";

/// Status of a vault query.
///
/// The A2A client reports status as a numeric string. The codes this crate
/// acts on have named variants, everything else is kept verbatim in
/// [`VaultStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VaultStatus {
    /// `400` - credential released.
    Success,
    /// `401` - vault refused the request, usually transient.
    Unauthorized,
    /// `415` - credential belongs to another application type.
    UnsupportedType,
    /// `-1` - client missing, failed, timed out or produced unreadable output.
    GenericFailure,
    /// Any other code reported by the vault.
    Other(String),
}

impl VaultStatus {
    /// Map a wire code to a status.
    pub fn from_wire(code: &str) -> Self {
        match code.trim() {
            SUCCESS_CODE => Self::Success,
            UNAUTHORIZED_CODE => Self::Unauthorized,
            UNSUPPORTED_TYPE_CODE => Self::UnsupportedType,
            GENERIC_FAILURE_CODE => Self::GenericFailure,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire code for this status.
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Success => SUCCESS_CODE,
            Self::Unauthorized => UNAUTHORIZED_CODE,
            Self::UnsupportedType => UNSUPPORTED_TYPE_CODE,
            Self::GenericFailure => GENERIC_FAILURE_CODE,
            Self::Other(code) => code,
        }
    }

    /// Whether a credential was released.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for VaultStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

/// Target system and account released by the vault.
pub struct TargetCredential {
    /// Target server host name.
    pub host: String,
    /// Target port, if the application defines one.
    pub port: Option<u16>,
    /// Instance or database name, if the application defines one.
    pub instance_or_database: Option<String>,
    /// Account user name.
    pub username: String,
    /// Account password.
    pub password: SecretString,
}

impl TargetCredential {
    /// Byte-wise password comparison against another credential.
    pub fn same_password(&self, other: &TargetCredential) -> bool {
        crate::security::constant_time_eq(
            self.password.expose_secret().as_bytes(),
            other.password.expose_secret().as_bytes(),
        )
    }
}

impl fmt::Debug for TargetCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("instance_or_database", &self.instance_or_database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Result of one vault query.
///
/// Invariant: `status` is [`VaultStatus::Success`] exactly when `target` is
/// present. Documents live for a single reconciliation attempt and are not
/// cached; the A2A client's own cache is the only cache.
#[derive(Debug)]
pub struct CredentialDocument {
    /// Query status.
    pub status: VaultStatus,
    /// Released credential (success only).
    pub target: Option<TargetCredential>,
    /// Application type reported by the vault, when known.
    pub extension_type: Option<String>,
}

impl CredentialDocument {
    /// A released credential.
    pub fn success(target: TargetCredential, extension_type: Option<String>) -> Self {
        Self {
            status: VaultStatus::Success,
            target: Some(target),
            extension_type,
        }
    }

    /// A failed query carrying only its status.
    pub fn failure(status: VaultStatus) -> Self {
        debug_assert!(!status.is_success());
        Self {
            status,
            target: None,
            extension_type: None,
        }
    }

    /// The `-1` sentinel document.
    pub fn generic_failure() -> Self {
        Self::failure(VaultStatus::GenericFailure)
    }

    /// A `415` document reporting the type actually found.
    pub fn unsupported_type(actual: Option<String>) -> Self {
        Self {
            status: VaultStatus::UnsupportedType,
            target: None,
            extension_type: actual,
        }
    }

    /// Whether the document carries a usable credential.
    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.target.is_some()
    }
}
