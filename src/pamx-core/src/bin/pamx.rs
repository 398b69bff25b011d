//! pamx CLI - vault credential retrieval and integrity-gated startup.
//!
//! Thin front end over `pamx_core`. Every subcommand reads the same
//! configuration (defaults, optional TOML file, `CSPM_CLIENT_HOME`) and
//! maps failures to distinct exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use pamx_core::config::GateConfig;
use pamx_core::{
    mask_secret, ConnectionReconciler, CredentialBroker, CspmClient, GateError, MssqlConnector,
    StartupSequence,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// pamx - PAM A2A credential retrieval with integrity-gated startup.
#[derive(Parser)]
#[command(name = "pamx")]
#[command(version = VERSION)]
#[command(about = "PAM A2A credential retrieval with integrity-gated startup")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one credential document from the A2A client
    Fetch {
        /// Vault alias
        alias: String,

        /// Ask the vault directly instead of the client cache
        #[arg(long)]
        bypass_cache: bool,

        /// Only accept credentials of this application type
        #[arg(long)]
        expect_type: Option<String>,

        /// Print the password in clear text
        #[arg(long)]
        reveal: bool,
    },

    /// Connect to the database with cache-then-bypass reconciliation
    Connect {
        /// Vault alias (defaults to database.alias)
        #[arg(long)]
        alias: Option<String>,

        /// Statement to run once connected; first column of each row is printed
        #[arg(long, default_value = "SELECT @@VERSION")]
        query: String,
    },

    /// Verify the manifest and every file it lists
    Verify {
        /// Manifest file (defaults to integrity.manifest)
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Pinned manifest digest (defaults to configuration or vault alias)
        #[arg(long)]
        digest: Option<String>,
    },

    /// Run the integrity gate, unlock the keystore and serve HTTPS
    Serve {
        /// Listen port (defaults to server.port)
        #[arg(long)]
        port: Option<u16>,

        /// Content directory (defaults to server.content_root)
        #[arg(long)]
        content_root: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_output = cli.format == "json";
    init_tracing(cli.verbose, json_output);

    let config = match GateConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    let result = match cli.command {
        Commands::Fetch {
            alias,
            bypass_cache,
            expect_type,
            reveal,
        } => cmd_fetch(&config, &alias, bypass_cache, expect_type, reveal, json_output).await,
        Commands::Connect { alias, query } => {
            cmd_connect(&config, alias, &query, json_output).await
        },
        Commands::Verify { manifest, digest } => {
            cmd_verify(config, manifest, digest, json_output).await
        },
        Commands::Serve { port, content_root } => cmd_serve(config, port, content_root).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn fail(err: &GateError) -> ExitCode {
    tracing::error!(error = %err, "pamx failed");
    eprintln!("Error: {}", err);
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}

async fn cmd_fetch(
    config: &GateConfig,
    alias: &str,
    bypass_cache: bool,
    expect_type: Option<String>,
    reveal: bool,
    json_output: bool,
) -> Result<(), GateError> {
    let mut broker = CredentialBroker::new(CspmClient::from_config(&config.vault));
    if let Some(expected) = expect_type {
        broker = broker.expecting(expected);
    }
    let doc = broker.fetch(alias, bypass_cache).await;

    if json_output {
        let target = doc.target.as_ref().map(|t| {
            serde_json::json!({
                "host": t.host,
                "port": t.port,
                "instance_or_database": t.instance_or_database,
                "username": t.username,
                "password": mask_secret(t.password.expose_secret(), reveal),
            })
        });
        let output = serde_json::json!({
            "alias": alias,
            "bypass_cache": bypass_cache,
            "status": doc.status,
            "extension_type": doc.extension_type,
            "target": target,
        });
        println!("{}", output);
    } else {
        println!("status={}", doc.status);
        if let Some(t) = &doc.target {
            println!(
                "alias={}, hostname={}, port={}, userid={}, passwd={}",
                alias,
                t.host,
                t.port.map(|p| p.to_string()).unwrap_or_default(),
                t.username,
                mask_secret(t.password.expose_secret(), reveal)
            );
        }
    }

    if doc.is_success() {
        Ok(())
    } else {
        Err(GateError::VaultUnavailable {
            alias: alias.to_string(),
            status: doc.status,
        })
    }
}

async fn cmd_connect(
    config: &GateConfig,
    alias: Option<String>,
    query: &str,
    json_output: bool,
) -> Result<(), GateError> {
    let alias = alias.unwrap_or_else(|| config.database.alias.clone());
    let reconciler = ConnectionReconciler::from_config(
        CspmClient::from_config(&config.vault),
        MssqlConnector::new(config.database.trust_server_certificate),
        &config.database,
    );

    let outcome = reconciler.acquire(&alias).await;
    let bypassed = outcome.bypassed;
    let Some(mut connection) = outcome.connection else {
        let reason = outcome
            .failure
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no connection".to_string());
        return Err(GateError::Connection { reason });
    };

    let rows = connection
        .query_strings(query)
        .await
        .map_err(|e| GateError::Connection {
            reason: e.to_string(),
        })?;
    if let Err(e) = connection.close().await {
        tracing::warn!(error = %e, "closing connection failed");
    }

    if json_output {
        let output = serde_json::json!({
            "alias": alias,
            "bypassed": bypassed,
            "rows": rows,
        });
        println!("{}", output);
    } else {
        println!("connected (bypass_cache={})", bypassed);
        for row in rows {
            println!("{}", row);
        }
    }
    Ok(())
}

async fn cmd_verify(
    mut config: GateConfig,
    manifest: Option<PathBuf>,
    digest: Option<String>,
    json_output: bool,
) -> Result<(), GateError> {
    if let Some(manifest) = manifest {
        config.integrity.manifest = manifest;
    }
    if digest.is_some() {
        config.integrity.pinned_digest = digest;
    }

    let source = CspmClient::from_config(&config.vault);
    let sequence = StartupSequence::new(config, source);
    let decision = sequence.gate_decision().await?;

    if json_output {
        let output = serde_json::json!({
            "status": if decision.passed { "pass" } else { "fail" },
            "manifest": sequence.config().integrity.manifest.display().to_string(),
            "entries_verified": decision.entries_verified,
            "failure": decision.failure.as_ref().map(|f| f.to_string()),
        });
        println!("{}", output);
    } else if decision.passed {
        println!("[PASS] {} files verified", decision.entries_verified);
    } else if let Some(failure) = &decision.failure {
        println!("[FAIL] {}", failure);
    }

    decision.into_result()?;
    Ok(())
}

async fn cmd_serve(
    mut config: GateConfig,
    port: Option<u16>,
    content_root: Option<PathBuf>,
) -> Result<(), GateError> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(content_root) = content_root {
        config.server.content_root = content_root;
    }

    let source = CspmClient::from_config(&config.vault);
    StartupSequence::new(config, source).run().await
}
