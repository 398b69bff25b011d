//! Manifest gate and manifest builder.
//!
//! ## Manifest Format
//!
//! One entry per line, `sha256sum --binary` style:
//!
//! ```text
//! 2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae */opt/app/webserver.py
//! fcde2b2edba56bf408601fb721fe9b5c338d10ee429ea04fae5511b68fbf8fb9 */opt/app/content/hello.html
//! ```
//!
//! The manifest itself is trusted only through its own SHA-256, pinned in
//! configuration or held in the vault. The gate is all-or-nothing: the
//! manifest digest, every line and every listed file must check out, and the
//! first failure ends the check.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::file_integrity::{is_digest_hex, IntegrityError, IntegrityResult, IntegrityVerifier};

/// Separator between digest and path (binary-mode marker).
const ENTRY_SEPARATOR: &str = " *";

/// Why the manifest gate failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityFailure {
    /// Manifest file does not match the pinned digest.
    #[error("manifest {path} does not match pinned digest (expected {expected}, got {actual})")]
    ManifestDigest {
        /// Manifest path.
        path: PathBuf,
        /// Pinned digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// Manifest file could not be read.
    #[error("manifest unreadable: {reason}")]
    ManifestUnreadable {
        /// Manifest path.
        path: PathBuf,
        /// I/O error description.
        reason: String,
    },

    /// A manifest line is not `<64 hex> *<path>`.
    #[error("malformed manifest line {line}: {reason}")]
    MalformedLine {
        /// 1-based line number.
        line: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// Manifest lists no files.
    #[error("manifest {path} lists no files")]
    EmptyManifest {
        /// Manifest path.
        path: PathBuf,
    },

    /// A listed file has been modified.
    #[error("{path} does not match its manifest digest (expected {expected}, got {actual})")]
    EntryMismatch {
        /// File path as listed.
        path: PathBuf,
        /// Digest from the manifest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// A listed file is missing or unreadable.
    #[error("{path} unreadable: {reason}")]
    EntryUnreadable {
        /// File path as listed.
        path: PathBuf,
        /// I/O error description.
        reason: String,
    },
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Lowercase hex SHA-256.
    pub digest: String,
    /// File path as listed.
    pub path: PathBuf,
}

impl ManifestEntry {
    /// Parse `<64 hex> *<path>`. `line_no` is used for error reporting only.
    pub fn parse(line: &str, line_no: usize) -> Result<Self, IntegrityFailure> {
        let malformed = |reason: &str| IntegrityFailure::MalformedLine {
            line: line_no,
            reason: reason.to_string(),
        };

        let (digest, path) = line
            .split_once(ENTRY_SEPARATOR)
            .ok_or_else(|| malformed("missing ' *' separator"))?;
        if !is_digest_hex(digest) {
            return Err(malformed("digest is not 64 hex characters"));
        }
        if path.is_empty() {
            return Err(malformed("missing path"));
        }

        Ok(Self {
            digest: digest.to_ascii_lowercase(),
            path: PathBuf::from(path),
        })
    }

    /// Render as a manifest line (without newline).
    pub fn to_line(&self) -> String {
        format!("{}{}{}", self.digest, ENTRY_SEPARATOR, self.path.display())
    }
}

/// Parse manifest text into entries, in file order.
///
/// `\r\n` line endings are accepted. Blank lines are allowed only at the end
/// of the file; a blank line followed by further entries is malformed.
pub fn parse_manifest(text: &str, manifest_path: &Path) -> Result<Vec<ManifestEntry>, IntegrityFailure> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    let content_len = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |last| last + 1);

    let mut entries = Vec::with_capacity(content_len);
    for (idx, line) in lines[..content_len].iter().enumerate() {
        if line.trim().is_empty() {
            return Err(IntegrityFailure::MalformedLine {
                line: idx + 1,
                reason: "blank line".to_string(),
            });
        }
        entries.push(ManifestEntry::parse(line, idx + 1)?);
    }

    if entries.is_empty() {
        return Err(IntegrityFailure::EmptyManifest {
            path: manifest_path.to_path_buf(),
        });
    }
    Ok(entries)
}

/// Final gate decision. Computed once per process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestGateDecision {
    /// Whether startup may proceed.
    pub passed: bool,
    /// Number of listed files verified.
    pub entries_verified: usize,
    /// First failure, when not passed.
    pub failure: Option<IntegrityFailure>,
}

impl ManifestGateDecision {
    /// Convert into a `Result`, yielding the number of verified entries.
    pub fn into_result(self) -> Result<usize, IntegrityFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.entries_verified),
        }
    }
}

/// Validates a manifest and every file it lists.
#[derive(Debug, Clone, Default)]
pub struct ManifestGate {
    verifier: IntegrityVerifier,
}

impl ManifestGate {
    /// Gate using `verifier` for all digests.
    pub fn new(verifier: IntegrityVerifier) -> Self {
        Self { verifier }
    }

    /// Check `manifest_path` against `pinned_digest`, then every entry.
    #[instrument(skip(self, pinned_digest), fields(manifest = %manifest_path.display()))]
    pub fn verify(&self, manifest_path: &Path, pinned_digest: &str) -> ManifestGateDecision {
        match self.check(manifest_path, pinned_digest) {
            Ok(entries_verified) => {
                info!(entries_verified, "file integrity verified");
                ManifestGateDecision {
                    passed: true,
                    entries_verified,
                    failure: None,
                }
            },
            Err(failure) => {
                error!(error = %failure, "file integrity check FAILED");
                ManifestGateDecision {
                    passed: false,
                    entries_verified: 0,
                    failure: Some(failure),
                }
            },
        }
    }

    fn check(&self, manifest_path: &Path, pinned_digest: &str) -> Result<usize, IntegrityFailure> {
        let unreadable = |reason: String| IntegrityFailure::ManifestUnreadable {
            path: manifest_path.to_path_buf(),
            reason,
        };

        // Digest and parse the same bytes, so the file cannot change in between.
        let bytes = fs::read(manifest_path)
            .map_err(|e| unreadable(format!("Cannot read {}: {}", manifest_path.display(), e)))?;
        let actual = self
            .verifier
            .digest_reader(bytes.as_slice())
            .map_err(|e| unreadable(e.to_string()))?;
        let expected = pinned_digest.trim().to_ascii_lowercase();
        if !super::constant_time_eq(actual.as_bytes(), expected.as_bytes()) {
            return Err(IntegrityFailure::ManifestDigest {
                path: manifest_path.to_path_buf(),
                expected,
                actual,
            });
        }

        let text = String::from_utf8(bytes).map_err(|_| unreadable("manifest is not UTF-8".to_string()))?;
        let entries = parse_manifest(&text, manifest_path)?;
        debug!(entries = entries.len(), "manifest parsed");

        for entry in &entries {
            self.check_entry(entry)?;
        }
        Ok(entries.len())
    }

    fn check_entry(&self, entry: &ManifestEntry) -> Result<(), IntegrityFailure> {
        match self.verifier.verify(&entry.path, &entry.digest) {
            IntegrityResult::Match => Ok(()),
            IntegrityResult::Mismatch { expected, actual } => Err(IntegrityFailure::EntryMismatch {
                path: entry.path.clone(),
                expected,
                actual,
            }),
            IntegrityResult::Unreadable { reason } => Err(IntegrityFailure::EntryUnreadable {
                path: entry.path.clone(),
                reason,
            }),
        }
    }
}

/// Manifest builder failure.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Glob pattern does not parse.
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        /// Offending pattern.
        pattern: String,
        /// Parser error.
        #[source]
        source: glob::PatternError,
    },

    /// Manifest could not be written.
    #[error("Cannot write manifest {path}: {source}")]
    Write {
        /// Output path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Nothing readable matched; such a manifest could never pass the gate.
    #[error("No files matched the manifest patterns")]
    NoFiles,

    /// Written manifest could not be digested.
    #[error("Cannot digest written manifest: {0}")]
    Digest(#[from] IntegrityError),
}

/// File left out of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// Path that was matched.
    pub path: PathBuf,
    /// Why it was left out.
    pub reason: String,
}

/// Result of [`ManifestBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Absolute path of the written manifest.
    pub manifest_path: PathBuf,
    /// SHA-256 of the written manifest, to be pinned.
    pub manifest_digest: String,
    /// Number of entries written.
    pub entry_count: usize,
    /// Files matched but not listed.
    pub skipped: Vec<SkippedFile>,
}

/// Produces manifests from glob patterns.
#[derive(Debug, Clone, Default)]
pub struct ManifestBuilder {
    verifier: IntegrityVerifier,
}

impl ManifestBuilder {
    /// Builder using `verifier` for all digests.
    pub fn new(verifier: IntegrityVerifier) -> Self {
        Self { verifier }
    }

    /// Expand `patterns`, digest every file and write the manifest to `output`.
    ///
    /// Matched directories are walked recursively. Paths are canonicalised,
    /// deduplicated and written in byte order of the path string. Files that
    /// cannot be read are skipped and reported. The output file itself is
    /// never listed. Fails with [`BuildError::NoFiles`], writing nothing,
    /// when no file is left to list.
    #[instrument(skip(self, patterns), fields(output = %output.display()))]
    pub fn build<P: AsRef<str>>(&self, patterns: &[P], output: &Path) -> Result<BuildReport, BuildError> {
        let mut skipped = Vec::new();
        let mut files = self.collect(patterns, &mut skipped)?;

        if let Ok(existing) = fs::canonicalize(output) {
            if let Some(key) = existing.to_str() {
                files.remove(key);
            }
        }

        let mut entries = Vec::with_capacity(files.len());
        for path in files.into_values() {
            match self.verifier.digest(&path) {
                Ok(digest) => {
                    debug!(path = %path.display(), digest = %digest, "file digested");
                    entries.push(ManifestEntry { digest, path });
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                },
            }
        }

        if entries.is_empty() {
            error!(skipped = skipped.len(), "no files to list, manifest not written");
            return Err(BuildError::NoFiles);
        }

        write_manifest(output, &entries).map_err(|source| BuildError::Write {
            path: output.to_path_buf(),
            source,
        })?;

        let manifest_path = fs::canonicalize(output).map_err(|source| BuildError::Write {
            path: output.to_path_buf(),
            source,
        })?;
        let manifest_digest = self.verifier.digest(&manifest_path)?;

        info!(
            manifest = %manifest_path.display(),
            digest = %manifest_digest,
            entries = entries.len(),
            skipped = skipped.len(),
            "manifest written"
        );

        Ok(BuildReport {
            manifest_path,
            manifest_digest,
            entry_count: entries.len(),
            skipped,
        })
    }

    /// Canonical file set keyed by path string.
    fn collect<P: AsRef<str>>(
        &self,
        patterns: &[P],
        skipped: &mut Vec<SkippedFile>,
    ) -> Result<BTreeMap<String, PathBuf>, BuildError> {
        let mut files = BTreeMap::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let matches = glob::glob(pattern).map_err(|source| BuildError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;

            let mut matched = 0usize;
            for item in matches {
                let item = match item {
                    Ok(item) => item,
                    Err(e) => {
                        warn!(path = %e.path().display(), error = %e.error(), "cannot read match");
                        skipped.push(SkippedFile {
                            path: e.path().to_path_buf(),
                            reason: e.error().to_string(),
                        });
                        continue;
                    },
                };
                matched += 1;
                add_path(&item, &mut files, skipped);
            }
            if matched == 0 {
                warn!(pattern = %pattern, "pattern matched nothing");
            }
        }
        Ok(files)
    }
}

/// Add a file, or every file below a directory, to the set.
///
/// A matched path is followed even when it is a symlink. Below it, symlinks
/// to directories are not descended into, so link cycles cannot recurse.
fn add_path(path: &Path, files: &mut BTreeMap<String, PathBuf>, skipped: &mut Vec<SkippedFile>) {
    let real = match fs::canonicalize(path) {
        Ok(real) => real,
        Err(e) => {
            skipped.push(SkippedFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
            return;
        },
    };

    if real.is_dir() {
        walk_dir(&real, files, skipped);
    } else if real.is_file() {
        insert_file(real, files, skipped);
    }
}

fn walk_dir(dir: &Path, files: &mut BTreeMap<String, PathBuf>, skipped: &mut Vec<SkippedFile>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot list directory");
            skipped.push(SkippedFile {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            });
            return;
        },
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk_dir(&path, files, skipped);
        } else if file_type.is_symlink() {
            if path.is_dir() {
                debug!(path = %path.display(), "not following directory symlink");
            } else {
                add_path(&path, files, skipped);
            }
        } else if file_type.is_file() {
            insert_file(path, files, skipped);
        }
    }
}

fn insert_file(path: PathBuf, files: &mut BTreeMap<String, PathBuf>, skipped: &mut Vec<SkippedFile>) {
    match path.to_str() {
        Some(key) => {
            files.insert(key.to_string(), path.clone());
        },
        None => skipped.push(SkippedFile {
            path,
            reason: "path is not valid UTF-8".to_string(),
        }),
    }
}

fn write_manifest(output: &Path, entries: &[ManifestEntry]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(output)?);
    for entry in entries {
        writeln!(out, "{}", entry.to_line())?;
    }
    out.flush()
}
