//! Manifest generation from a pattern list.

use std::path::{Path, PathBuf};

use pamx_core::security::manifest::{BuildError, BuildReport, ManifestBuilder};

/// Error during manifest generation.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Cannot read pattern list {path}: {source}")]
    PatternList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pattern list {0} contains no patterns")]
    NoPatterns(PathBuf),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Patterns from a list file: one per line, blank lines and `#` comments ignored.
pub fn read_patterns(filelist: &Path) -> Result<Vec<String>, ManifestError> {
    let text = std::fs::read_to_string(filelist).map_err(|source| ManifestError::PatternList {
        path: filelist.to_path_buf(),
        source,
    })?;
    Ok(parse_patterns(&text))
}

fn parse_patterns(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Expand the patterns in `filelist` and write the manifest to `output`.
pub fn generate_manifest(filelist: &Path, output: &Path) -> Result<BuildReport, ManifestError> {
    let patterns = read_patterns(filelist)?;
    if patterns.is_empty() {
        return Err(ManifestError::NoPatterns(filelist.to_path_buf()));
    }
    tracing::debug!(patterns = patterns.len(), "pattern list read");

    Ok(ManifestBuilder::default().build(&patterns, output)?)
}
