//! Integrity-gated HTTPS server startup.
//!
//! The server refuses to start unless:
//! 1. the manifest matches its pinned digest and every listed file matches,
//! 2. the vault releases the keystore password,
//! 3. the keystore opens with that password.
//!
//! The vault only releases the keystore password to an unmodified caller,
//! and the manifest check extends that guarantee to the content and support
//! files the vault does not see.

use secrecy::ExposeSecret;
use tracing::{error, info, instrument};

use pamx_keystore::{load_pkcs12, TlsIdentity};

use crate::broker::CredentialSource;
use crate::config::GateConfig;
use crate::error::GateError;
use crate::resolver::SecretResolver;
use crate::security::file_integrity::IntegrityVerifier;
use crate::security::manifest::{ManifestGate, ManifestGateDecision};
use crate::web;

/// Startup steps for the HTTPS content server.
pub struct StartupSequence<S> {
    config: GateConfig,
    resolver: SecretResolver<S>,
    gate: ManifestGate,
}

impl<S: CredentialSource> StartupSequence<S> {
    /// Sequence using `source` for every vault lookup.
    pub fn new(config: GateConfig, source: S) -> Self {
        let resolver = SecretResolver::from_config(source, &config.vault);
        let gate = ManifestGate::new(IntegrityVerifier::with_chunk_size(config.integrity.chunk_size));
        Self {
            config,
            resolver,
            gate,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Pinned manifest digest: configured literal, else vault alias.
    pub async fn pinned_digest(&self) -> Result<String, GateError> {
        let integrity = &self.config.integrity;
        if let Some(digest) = &integrity.pinned_digest {
            return Ok(digest.trim().to_string());
        }
        match &integrity.pinned_digest_alias {
            Some(alias) => {
                let secret = self.resolver.password(alias).await?;
                Ok(secret.expose_secret().trim().to_string())
            },
            None => Err(GateError::config(
                "integrity.pinned_digest or integrity.pinned_digest_alias is required",
            )),
        }
    }

    /// Resolve the pinned digest and run the manifest gate.
    ///
    /// `Err` only when the pinned digest cannot be obtained; a failed check
    /// is reported in the decision.
    pub async fn gate_decision(&self) -> Result<ManifestGateDecision, GateError> {
        let pinned = self.pinned_digest().await?;
        let manifest = &self.config.integrity.manifest;
        info!(manifest = %manifest.display(), "validating integrity of filelist");
        Ok(self.gate.verify(manifest, &pinned))
    }

    /// Run the manifest gate. Returns the number of verified files.
    pub async fn verify_integrity(&self) -> Result<usize, GateError> {
        Ok(self.gate_decision().await?.into_result()?)
    }

    /// Everything up to, but not including, binding the listener.
    #[instrument(skip(self))]
    pub async fn prepare(&self) -> Result<TlsIdentity, GateError> {
        let verified = self.verify_integrity().await.map_err(|e| {
            error!(error = %e, "integrity gate failed, not starting server");
            e
        })?;
        info!(files = verified, "integrity gate passed");

        let server = &self.config.server;
        let password = self.resolver.password(&server.keystore_alias).await?;
        let identity = load_pkcs12(&server.keystore, &password)?;
        Ok(identity)
    }

    /// Prepare, then serve until Ctrl-C.
    pub async fn run(self) -> Result<(), GateError> {
        let identity = self.prepare().await?;
        let tls = identity.server_config()?;

        let server = &self.config.server;
        let addr = server.listen_addr()?;
        let app = web::router(server.content_root.clone());
        web::serve(
            addr,
            app,
            tls,
            std::time::Duration::from_secs(server.shutdown_grace_secs),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SourceError;
    use crate::security::manifest::{IntegrityFailure, ManifestBuilder};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;

    /// Vault holding plain secrets by alias; records every alias asked for.
    #[derive(Default)]
    struct SecretVault {
        secrets: HashMap<&'static str, String>,
        requested: Mutex<Vec<String>>,
    }

    impl SecretVault {
        fn with(mut self, alias: &'static str, secret: impl Into<String>) -> Self {
            self.secrets.insert(alias, secret.into());
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CredentialSource for SecretVault {
        async fn retrieve(&self, alias: &str, _bypass_cache: bool) -> Result<String, SourceError> {
            self.requested.lock().unwrap().push(alias.to_string());
            Ok(match self.secrets.get(alias) {
                Some(secret) => format!(
                    "<r><errorcode>400</errorcode><credential>\
                     <TargetServer><hostName>web1</hostName></TargetServer>\
                     <TargetAccount><userName>svc</userName><password>{secret}</password></TargetAccount>\
                     </credential></r>"
                ),
                None => "<r><errorcode>404</errorcode></r>".to_string(),
            })
        }
    }

    /// Site with one content file and a manifest for it; returns the config
    /// (no pinned digest set) and the manifest digest.
    fn site(dir: &std::path::Path) -> (GateConfig, String) {
        let page = dir.join("hello.html");
        fs::write(&page, b"<h1>Hello</h1>").unwrap();
        let manifest = dir.join("filelist.sha256");
        let report = ManifestBuilder::default()
            .build(&[page.display().to_string()], &manifest)
            .unwrap();

        let mut config = GateConfig::default();
        config.integrity.manifest = manifest;
        config.integrity.pinned_digest = None;
        config.integrity.pinned_digest_alias = None;
        config.server.keystore = dir.join("absent.p12");
        config.server.keystore_alias = "Python-WebServer".to_string();
        (config, report.manifest_digest)
    }

    #[tokio::test]
    async fn test_tampered_content_halts_before_keystore_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, digest) = site(dir.path());
        config.integrity.pinned_digest = Some(digest);
        fs::write(dir.path().join("hello.html"), b"<h1>Defaced</h1>").unwrap();

        let vault = SecretVault::default().with("Python-WebServer", "changeit");
        let sequence = StartupSequence::new(config, &vault);
        let err = sequence.prepare().await.err().unwrap();

        assert!(matches!(
            err,
            GateError::Integrity(IntegrityFailure::EntryMismatch { .. })
        ));
        assert_eq!(err.exit_code(), 3);
        assert!(vault.requested().is_empty());
    }

    #[tokio::test]
    async fn test_intact_site_proceeds_to_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, digest) = site(dir.path());
        config.integrity.pinned_digest = Some(format!("  {}\n", digest.to_uppercase()));

        let vault = SecretVault::default().with("Python-WebServer", "changeit");
        let sequence = StartupSequence::new(config, &vault);
        assert_eq!(sequence.verify_integrity().await.unwrap(), 1);

        // Keystore file does not exist, so startup stops at loading it.
        let err = sequence.prepare().await.err().unwrap();
        assert!(matches!(err, GateError::Keystore(_)));
        assert_eq!(vault.requested(), vec!["Python-WebServer".to_string()]);
    }

    #[tokio::test]
    async fn test_pinned_digest_from_vault() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, digest) = site(dir.path());
        config.integrity.pinned_digest_alias = Some("filelist-digest".to_string());

        let vault = SecretVault::default().with("filelist-digest", digest.clone());
        let sequence = StartupSequence::new(config, &vault);

        assert_eq!(sequence.pinned_digest().await.unwrap(), digest);
        let decision = sequence.gate_decision().await.unwrap();
        assert!(decision.passed, "{:?}", decision.failure);
        assert_eq!(decision.entries_verified, 1);
        assert!(vault.requested().iter().all(|alias| alias == "filelist-digest"));
    }

    #[tokio::test]
    async fn test_literal_digest_wins_over_alias() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, digest) = site(dir.path());
        config.integrity.pinned_digest = Some(digest.clone());
        config.integrity.pinned_digest_alias = Some("filelist-digest".to_string());

        let vault = SecretVault::default();
        let sequence = StartupSequence::new(config, &vault);
        assert_eq!(sequence.pinned_digest().await.unwrap(), digest);
        assert!(vault.requested().is_empty());
    }

    #[tokio::test]
    async fn test_unreleased_digest_alias_is_vault_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, _) = site(dir.path());
        config.integrity.pinned_digest_alias = Some("filelist-digest".to_string());

        let vault = SecretVault::default();
        let err = StartupSequence::new(config, &vault)
            .prepare()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GateError::VaultUnavailable { .. }));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(vault.requested(), vec!["filelist-digest".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_pinned_digest_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _) = site(dir.path());

        let vault = SecretVault::default().with("Python-WebServer", "changeit");
        let err = StartupSequence::new(config, &vault)
            .prepare()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GateError::Config { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(vault.requested().is_empty());
    }
}
