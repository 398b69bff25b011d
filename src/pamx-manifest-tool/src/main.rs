//! pamx-manifest-tool - file manifest generator for integrity-gated startup.
//!
//! Produces the `<sha256> *<path>` manifest checked by `pamx serve` and
//! `pamx verify`, and prints the manifest's own digest for pinning.
//!
//! ## Usage
//!
//! ```bash
//! # Build a manifest from a pattern list
//! pamx-manifest-tool build --filelist filelist.txt --output filelist.sha256
//!
//! # Digest of a single file
//! pamx-manifest-tool digest filelist.sha256
//!
//! # Check a manifest against its pinned digest
//! pamx-manifest-tool verify --manifest filelist.sha256 --digest 40ddad4f...
//! ```

mod manifest;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pamx_core::security::file_integrity::IntegrityVerifier;
use pamx_core::security::manifest::ManifestGate;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File manifest generator for integrity-gated startup.
#[derive(Parser)]
#[command(name = "pamx-manifest-tool")]
#[command(version = VERSION)]
#[command(about = "File manifest generator for integrity-gated startup")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a manifest from a list of glob patterns
    Build {
        /// Pattern list, one glob per line
        #[arg(short, long)]
        filelist: PathBuf,

        /// Manifest to write
        #[arg(short, long, default_value = "filelist.sha256")]
        output: PathBuf,
    },

    /// Print the SHA-256 of a file
    Digest {
        /// File to digest
        file: PathBuf,
    },

    /// Verify a manifest and every file it lists
    Verify {
        /// Manifest file
        #[arg(short, long, default_value = "filelist.sha256")]
        manifest: PathBuf,

        /// Pinned SHA-256 of the manifest
        #[arg(short, long)]
        digest: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Build { filelist, output } => {
            eprintln!("Building file manifest...");
            eprintln!("  Pattern list: {}", filelist.display());

            let report = manifest::generate_manifest(&filelist, &output)?;

            for skipped in &report.skipped {
                eprintln!("  Skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            eprintln!("  Files: {}", report.entry_count);
            println!("\nResult file: {}", report.manifest_path.display());
            println!(
                "SHA256 of result file: {} *{}",
                report.manifest_digest,
                report.manifest_path.display()
            );
        }

        Commands::Digest { file } => {
            let digest = IntegrityVerifier::new()
                .digest(&file)
                .with_context(|| format!("digesting {}", file.display()))?;
            println!("{} *{}", digest, file.display());
        }

        Commands::Verify { manifest, digest } => {
            let decision = ManifestGate::default().verify(&manifest, &digest);
            if decision.passed {
                println!("[PASS] {} files verified", decision.entries_verified);
            }
            decision
                .into_result()
                .with_context(|| format!("verifying {}", manifest.display()))?;
        }
    }

    Ok(())
}
