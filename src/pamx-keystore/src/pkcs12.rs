//! PKCS#12 parsing and rustls server configuration.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use p12::PFX;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::KeystoreError;

/// ALPN protocols offered by the server.
const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Server key and certificate chain taken from a keystore.
pub struct TlsIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Certificate chain, leaf first as stored in the keystore.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// Build a TLS server configuration (ring provider, TLS 1.2 and 1.3,
    /// no client authentication, ALPN `http/1.1`).
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, KeystoreError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];
        Ok(Arc::new(config))
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("certificates", &self.certs.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Read and unlock the keystore at `path`.
pub fn load_pkcs12(path: &Path, password: &SecretString) -> Result<TlsIdentity, KeystoreError> {
    debug!(path = %path.display(), "loading PKCS#12 keystore");
    let data = std::fs::read(path).map_err(|source| KeystoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let identity = parse_pkcs12(&data, password)?;
    info!(
        path = %path.display(),
        certificates = identity.certs.len(),
        "loaded private key and certificate from PKCS#12 keystore"
    );
    Ok(identity)
}

/// Unlock DER-encoded PKCS#12 data.
pub fn parse_pkcs12(data: &[u8], password: &SecretString) -> Result<TlsIdentity, KeystoreError> {
    let pfx = PFX::parse(data).map_err(|e| KeystoreError::invalid_format(format!("{:?}", e)))?;

    let password = password.expose_secret();
    if !pfx.verify_mac(password) {
        return Err(KeystoreError::WrongPassword);
    }

    let certs: Vec<CertificateDer<'static>> = pfx
        .cert_x509_bags(password)
        .map_err(|e| KeystoreError::invalid_format(format!("{:?}", e)))?
        .into_iter()
        .map(CertificateDer::from)
        .collect();
    if certs.is_empty() {
        return Err(KeystoreError::NoCertificate);
    }

    let key = pfx
        .key_bags(password)
        .map_err(|e| KeystoreError::invalid_format(format!("{:?}", e)))?
        .into_iter()
        .next()
        .ok_or(KeystoreError::NoPrivateKey)?;

    Ok(TlsIdentity {
        certs,
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
    })
}
