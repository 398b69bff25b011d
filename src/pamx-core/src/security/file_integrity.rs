//! Streaming SHA-256 file verification.
//!
//! Files are read in fixed-size blocks so memory use does not depend on file
//! size. Digests are rendered as 64 lowercase hex characters and compared
//! ignoring ASCII case, since manifests produced by other tools may use
//! upper-case hex.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default read block size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// A file could not be digested.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Open or read failed (missing file, permissions, I/O error).
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        /// File that was being digested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl IntegrityError {
    /// Path of the offending file.
    pub fn path(&self) -> &Path {
        match self {
            Self::Unreadable { path, .. } => path,
        }
    }
}

/// Outcome of checking one file against an expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityResult {
    /// Digest matches.
    Match,
    /// Digest differs.
    Mismatch {
        /// Expected digest as given (normalised to lowercase).
        expected: String,
        /// Computed digest.
        actual: String,
    },
    /// File could not be read. Treated as a failure, never skipped.
    Unreadable {
        /// Error description including the path.
        reason: String,
    },
}

impl IntegrityResult {
    /// Whether the file matched.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Computes and checks file digests.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    chunk_size: usize,
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityVerifier {
    /// Verifier with the default block size.
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Verifier with a custom block size. Zero falls back to the default.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: if chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                chunk_size
            },
        }
    }

    /// Read block size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Lowercase hex SHA-256 of the file at `path`.
    pub fn digest(&self, path: &Path) -> Result<String, IntegrityError> {
        let unreadable = |source| IntegrityError::Unreadable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unreadable)?;
        self.digest_reader(file).map_err(unreadable)
    }

    /// Lowercase hex SHA-256 of everything `reader` yields.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> io::Result<String> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Check the file at `path` against `expected`.
    pub fn verify(&self, path: &Path, expected: &str) -> IntegrityResult {
        let actual = match self.digest(path) {
            Ok(actual) => actual,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "file unreadable");
                return IntegrityResult::Unreadable {
                    reason: e.to_string(),
                };
            },
        };

        let expected = expected.trim().to_ascii_lowercase();
        if super::constant_time_eq(actual.as_bytes(), expected.as_bytes()) {
            tracing::debug!(path = %path.display(), "digest OK");
            IntegrityResult::Match
        } else {
            tracing::warn!(
                path = %path.display(),
                expected = %expected,
                actual = %actual,
                "digest mismatch"
            );
            IntegrityResult::Mismatch { expected, actual }
        }
    }
}

/// Whether `s` is a well-formed hex SHA-256 digest (either case).
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
