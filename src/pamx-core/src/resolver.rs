//! Plain "password for alias" lookups.
//!
//! Used for secrets that are not database logins: the keystore password of
//! the HTTPS server and, optionally, the pinned manifest digest. The vault
//! answers `401` for a short while after a client starts or a policy is
//! reloaded, so those answers are retried a bounded number of times.

use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, info, instrument, warn};

use crate::broker::{CredentialBroker, CredentialSource};
use crate::config::VaultConfig;
use crate::error::GateError;
use crate::types::VaultStatus;

/// Resolves secrets stored as account passwords in the vault.
pub struct SecretResolver<S> {
    broker: CredentialBroker<S>,
    max_attempts: u32,
    backoff: Duration,
}

impl<S: CredentialSource> SecretResolver<S> {
    /// Resolver with the default retry policy (10 attempts, 250 ms apart).
    pub fn new(source: S) -> Self {
        let defaults = VaultConfig::default();
        Self::from_config(source, &defaults)
    }

    /// Resolver using the `[vault]` retry settings.
    pub fn from_config(source: S, config: &VaultConfig) -> Self {
        Self {
            broker: CredentialBroker::new(source),
            max_attempts: config.unauthorized_retries.max(1),
            backoff: config.unauthorized_backoff(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Password stored under `alias`.
    #[instrument(skip(self))]
    pub async fn password(&self, alias: &str) -> Result<SecretString, GateError> {
        let mut attempt = 1;
        loop {
            let document = self.broker.fetch(alias, false).await;
            match (document.status, document.target) {
                (VaultStatus::Success, Some(target)) => {
                    info!(alias = %alias, attempt, "secret released");
                    return Ok(target.password);
                },
                (VaultStatus::Unauthorized, _) if attempt < self.max_attempts => {
                    debug!(alias = %alias, attempt, "vault answered 401, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                },
                (status, _) => {
                    warn!(alias = %alias, attempt, status = %status, "secret not released");
                    return Err(GateError::VaultUnavailable {
                        alias: alias.to_string(),
                        status,
                    });
                },
            }
        }
    }
}
