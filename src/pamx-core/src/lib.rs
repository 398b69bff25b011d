//! # pamx-core
//!
//! Credential retrieval from a PAM vault through the local A2A client, and
//! integrity-gated startup of services that depend on those credentials.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐    ┌──────────────────────────────┐
//! │     ConnectionReconciler     │    │        StartupSequence       │
//! │  cached → connect → bypass   │    │ gate → password → keystore   │
//! │  → compare → retry once      │    │ → HTTPS listener             │
//! └──────────────┬───────────────┘    └───────┬──────────────┬───────┘
//!                │                            │              │
//!                ▼                            ▼              ▼
//! ┌──────────────────────────────┐    ┌──────────────┐ ┌──────────────┐
//! │      CredentialBroker        │◄───│SecretResolver│ │ ManifestGate │
//! │  XML → CredentialDocument    │    └──────────────┘ └──────┬───────┘
//! └──────────────┬───────────────┘                            │
//!                ▼                                            ▼
//! ┌──────────────────────────────┐               ┌─────────────────────┐
//! │ CredentialSource (cspmclient)│               │ IntegrityVerifier   │
//! └──────────────────────────────┘               │ (streaming SHA-256) │
//!                                                └─────────────────────┘
//! ```
//!
//! ## Failure Policy
//!
//! - Vault and client problems never raise: they surface as a
//!   [`VaultStatus`] on the returned document.
//! - A stale cached password is retried exactly once with a freshly
//!   fetched one, and only when the password actually changed.
//! - Integrity checking is all-or-nothing. A failed gate halts startup.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod broker;
pub mod config;
pub mod connector;
pub mod error;
pub mod reconcile;
pub mod resolver;
pub mod security;
pub mod startup;
pub mod types;
pub mod web;

pub use broker::{CredentialBroker, CredentialSource, CspmClient, SourceError};
pub use config::GateConfig;
pub use connector::{ConnectError, ConnectParams, Connector, MssqlConnection, MssqlConnector};
pub use error::GateError;
pub use reconcile::{ConnectionReconciler, FailureReason, ReconciliationOutcome};
pub use resolver::SecretResolver;
pub use security::file_integrity::{IntegrityError, IntegrityResult, IntegrityVerifier};
pub use security::manifest::{
    BuildError, BuildReport, IntegrityFailure, ManifestBuilder, ManifestEntry, ManifestGate,
    ManifestGateDecision,
};
pub use security::{constant_time_eq, mask_secret};
pub use startup::StartupSequence;
pub use types::{CredentialDocument, TargetCredential, VaultStatus};
