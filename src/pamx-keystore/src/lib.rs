//! # pamx-keystore
//!
//! Loads a PKCS#12 keystore (server private key plus certificate chain) and
//! turns it into a `rustls` server configuration.
//!
//! The keystore password is never stored in configuration; callers obtain it
//! from the vault and pass it in as a [`secrecy::SecretString`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pamx_keystore::load_pkcs12;
//!
//! let identity = load_pkcs12("Keystore/Python-WebServer.keystore".as_ref(), &password)?;
//! let tls = identity.server_config()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod error;
mod pkcs12;

pub use error::KeystoreError;
pub use pkcs12::{load_pkcs12, parse_pkcs12, TlsIdentity};
