//! Cache-then-bypass credential reconciliation.
//!
//! The A2A client answers from its local cache in a fraction of the time a
//! vault round trip takes, but a cached password can be stale after a
//! rotation. The reconciler uses the cached credential first and, when the
//! connection fails, asks the vault directly. It retries exactly once and
//! only when the fresh password differs from the cached one; an unchanged
//! password means the failure lies elsewhere (network, server, account).
//!
//! ```text
//! CachedFetch ──non-400──► Failed(VaultRejected)
//!     │ 400
//!     ▼
//! AttemptCached ──ok──► Connected
//!     │ err/timeout
//!     ▼
//! BypassFetch ──non-400──► Failed(BypassFetchFailed)
//!     │ 400
//!     ▼
//! CompareAndRetry ──same password──► Failed(CredentialsUnchanged)
//!     │ changed
//!     ▼
//! AttemptBypass ──ok──► Connected
//!     └──err/timeout──► Failed(BypassCredentialRejected)
//! ```

use std::fmt;
use std::time::Duration;

use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::broker::{CredentialBroker, CredentialSource};
use crate::config::DatabaseConfig;
use crate::connector::{ConnectError, ConnectParams, Connector};
use crate::security::mask_secret;
use crate::types::{CredentialDocument, TargetCredential, VaultStatus};

/// Why reconciliation ended without a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// Cached fetch did not release a credential.
    #[error("vault status {status} is not success")]
    VaultRejected {
        /// Status of the cached fetch.
        status: VaultStatus,
    },

    /// Bypass fetch did not release a credential.
    #[error("bypass fetch failed with vault status {status}")]
    BypassFetchFailed {
        /// Status of the bypass fetch.
        status: VaultStatus,
    },

    /// Fresh password equals the cached one; retrying cannot help.
    #[error("credentials identical; underlying connection/environment problem: {error}")]
    CredentialsUnchanged {
        /// Error of the cached connection attempt.
        error: String,
    },

    /// Fresh password was rejected as well.
    #[error("bypass credential also rejected: {error}")]
    BypassCredentialRejected {
        /// Error of the bypass connection attempt.
        error: String,
    },
}

/// Result of [`ConnectionReconciler::acquire`].
pub struct ReconciliationOutcome<H> {
    /// Credential the outcome refers to: the one connected with, or the
    /// last one fetched.
    pub credential: Option<CredentialDocument>,
    /// Open connection on success.
    pub connection: Option<H>,
    /// Failure reason when no connection was made.
    pub failure: Option<FailureReason>,
    /// Whether the cache-bypass credential was used.
    pub bypassed: bool,
}

impl<H> ReconciliationOutcome<H> {
    fn connected(credential: CredentialDocument, connection: H, bypassed: bool) -> Self {
        Self {
            credential: Some(credential),
            connection: Some(connection),
            failure: None,
            bypassed,
        }
    }

    fn failed(credential: Option<CredentialDocument>, reason: FailureReason, bypassed: bool) -> Self {
        Self {
            credential,
            connection: None,
            failure: Some(reason),
            bypassed,
        }
    }

    /// Whether a connection was established.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Credential connected with (success only).
    pub fn target(&self) -> Option<&TargetCredential> {
        self.credential.as_ref().and_then(|doc| doc.target.as_ref())
    }
}

impl<H> fmt::Debug for ReconciliationOutcome<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationOutcome")
            .field("credential", &self.credential)
            .field("connected", &self.connection.is_some())
            .field("failure", &self.failure)
            .field("bypassed", &self.bypassed)
            .finish()
    }
}

/// Runs the cache-then-bypass protocol against a connector.
pub struct ConnectionReconciler<S, C> {
    broker: CredentialBroker<S>,
    connector: C,
    driver: String,
    connect_timeout: Duration,
    reveal_secrets: bool,
}

impl<S: CredentialSource, C: Connector> ConnectionReconciler<S, C> {
    /// Reconciler for `driver` credentials.
    ///
    /// The broker is narrowed to credentials of type `driver`.
    pub fn new(source: S, connector: C, driver: impl Into<String>) -> Self {
        let driver = driver.into();
        Self {
            broker: CredentialBroker::new(source).expecting(driver.clone()),
            connector,
            driver,
            connect_timeout: Duration::from_secs(15),
            reveal_secrets: false,
        }
    }

    /// Reconciler configured from the `[database]` section.
    pub fn from_config(source: S, connector: C, config: &DatabaseConfig) -> Self {
        Self::new(source, connector, config.driver.clone())
            .with_connect_timeout(config.connect_timeout())
            .with_reveal_secrets(config.reveal_secrets)
    }

    /// Bound each connection attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Log passwords in clear text.
    pub fn with_reveal_secrets(mut self, reveal: bool) -> Self {
        self.reveal_secrets = reveal;
        self
    }

    /// Broker used for both fetches.
    pub fn broker(&self) -> &CredentialBroker<S> {
        &self.broker
    }

    /// Obtain a working connection for `alias`.
    #[instrument(skip(self), fields(driver = %self.driver))]
    pub async fn acquire(&self, alias: &str) -> ReconciliationOutcome<C::Connection> {
        let cached = self.broker.fetch(alias, false).await;
        let Some(cached_target) = cached.target.as_ref().filter(|_| cached.is_success()) else {
            warn!(alias = %alias, status = %cached.status, "cached fetch rejected");
            let status = cached.status.clone();
            return ReconciliationOutcome::failed(
                Some(cached),
                FailureReason::VaultRejected { status },
                false,
            );
        };

        self.log_credential(alias, false, cached_target);
        let cached_error = match self.try_connect(cached_target).await {
            Ok(connection) => {
                info!(
                    alias = %alias,
                    host = %cached_target.host,
                    username = %cached_target.username,
                    "connected with cached credential"
                );
                return ReconciliationOutcome::connected(cached, connection, false);
            },
            Err(e) => e,
        };
        warn!(
            alias = %alias,
            host = %cached_target.host,
            username = %cached_target.username,
            error = %cached_error,
            "cached credential failed, fetching with cache bypass"
        );

        let fresh = self.broker.fetch(alias, true).await;
        let Some(fresh_target) = fresh.target.as_ref().filter(|_| fresh.is_success()) else {
            warn!(alias = %alias, status = %fresh.status, "bypass fetch rejected");
            let status = fresh.status.clone();
            return ReconciliationOutcome::failed(
                Some(fresh),
                FailureReason::BypassFetchFailed { status },
                true,
            );
        };
        self.log_credential(alias, true, fresh_target);

        if fresh_target.same_password(cached_target) {
            warn!(
                alias = %alias,
                host = %fresh_target.host,
                username = %fresh_target.username,
                "vault password unchanged; not retrying"
            );
            return ReconciliationOutcome::failed(
                Some(fresh),
                FailureReason::CredentialsUnchanged {
                    error: cached_error.to_string(),
                },
                true,
            );
        }

        match self.try_connect(fresh_target).await {
            Ok(connection) => {
                info!(
                    alias = %alias,
                    host = %fresh_target.host,
                    username = %fresh_target.username,
                    "connected with bypass credential"
                );
                ReconciliationOutcome::connected(fresh, connection, true)
            },
            Err(e) => {
                warn!(
                    alias = %alias,
                    host = %fresh_target.host,
                    username = %fresh_target.username,
                    error = %e,
                    "bypass credential rejected"
                );
                ReconciliationOutcome::failed(
                    Some(fresh),
                    FailureReason::BypassCredentialRejected {
                        error: e.to_string(),
                    },
                    true,
                )
            },
        }
    }

    async fn try_connect(&self, target: &TargetCredential) -> Result<C::Connection, ConnectError> {
        let params = ConnectParams::from_target(&self.driver, target);
        match tokio::time::timeout(self.connect_timeout, self.connector.connect(&params)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout),
        }
    }

    fn log_credential(&self, alias: &str, bypass_cache: bool, target: &TargetCredential) {
        info!(
            alias = %alias,
            bypass_cache,
            host = %target.host,
            port = ?target.port,
            database = ?target.instance_or_database,
            username = %target.username,
            password = %mask_secret(target.password.expose_secret(), self.reveal_secrets),
            "credential obtained"
        );
    }
}
