//! Keyward CLI: provision, rotate and inspect key stores.
//!
//! Environment:
//!   KEYWARD_HOME         - base directory for the default layout (default: ./keyward-data)
//!   KEYWARD_CONFIG       - JSON config file, overrides KEYWARD_HOME
//!   KEYWARD_LOG_FORMAT   - "json" for structured logging, "pretty" for dev
//!   RUST_LOG             - log filter (default: keyward=info)

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use keyward::{
    AuditSink, CryptoFacade, FileAuditSink, KeyStoreManager, KeySystemConfig, TracingAuditSink,
};
use keyward_envelope::Envelope;

// ── CLI structure ─────────────────────────────────────────────────────────────

/// Keyward: versioned key stores with layered encryption at rest.
#[derive(Parser, Debug)]
#[command(name = "keyward", about = "Keyward key store CLI", version)]
struct Cli {
    /// JSON config file (default: KEYWARD_CONFIG, then KEYWARD_HOME layout)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base directory for the default layout
    #[arg(long, global = true, conflicts_with = "config")]
    home: Option<PathBuf>,

    /// Append audit events as JSON lines to this file instead of the log
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision any missing store and refresh public companions
    Init,
    /// Add a new primary to the meta store and every managed store
    Rotate,
    /// Show every store's versions and statuses
    Status {
        /// Only this store
        store: Option<String>,
    },
    /// Append a key version
    AddKey {
        store: String,
        /// Make the new version primary
        #[arg(long)]
        primary: bool,
    },
    /// Promote a version one step (INACTIVE → ACTIVE → PRIMARY)
    Promote {
        store: String,
        version: u32,
        /// Promote all the way to PRIMARY
        #[arg(long)]
        to_primary: bool,
    },
    /// Demote a version one step
    Demote {
        store: String,
        version: u32,
        /// ACTIVE version that becomes primary when demoting the primary
        #[arg(long)]
        promote_instead: Option<u32>,
    },
    /// Remove a non-primary version and its material
    Revoke { store: String, version: u32 },
    /// Regenerate an asymmetric store's public companion
    ExportPublic { store: String },
    /// Re-wrap an encrypted store under the meta store's current primary
    Rewrap { store: String },
    /// Encrypt a file
    Encrypt {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long = "out")]
        output: PathBuf,
        /// Store to encrypt under (default: the configured local store)
        #[arg(long)]
        store: Option<String>,
        /// Encrypt under this version instead of the primary
        #[arg(long, conflicts_with = "for_store")]
        version: Option<u32>,
        /// Encrypt with the public companion of this store
        #[arg(long = "for")]
        for_store: Option<String>,
    },
    /// Decrypt a file
    Decrypt {
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long = "out")]
        output: PathBuf,
        #[arg(long)]
        store: Option<String>,
    },
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn init_tracing() {
    let log_format = std::env::var("KEYWARD_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keyward=info".into());
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<KeySystemConfig> {
    let config = match (&cli.config, &cli.home) {
        (Some(path), _) => KeySystemConfig::from_file(path)?,
        (None, Some(home)) => KeySystemConfig::with_base_dir(home),
        (None, None) => KeySystemConfig::from_env()?,
    };
    Ok(config)
}

fn build_manager(cli: &Cli) -> Result<Arc<KeyStoreManager>> {
    let config = load_config(cli).context("loading configuration")?;
    let audit: Arc<dyn AuditSink> = match &cli.audit_log {
        Some(path) => Arc::new(FileAuditSink::new(path)),
        None => Arc::new(TracingAuditSink),
    };
    let manager = KeyStoreManager::new(config, Arc::new(Envelope::new()), audit)?;
    Ok(Arc::new(manager))
}

fn facade(manager: &Arc<KeyStoreManager>, store: Option<String>) -> Result<CryptoFacade> {
    let facade = match store {
        Some(store) => CryptoFacade::new(manager.clone(), store)?,
        None => CryptoFacade::from_config(manager.clone())?,
    };
    Ok(facade)
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if path == Path::new("-") {
        std::io::stdout().write_all(data).context("writing stdout")?;
        return Ok(());
    }
    fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_status(manager: &KeyStoreManager, only: Option<&str>) -> Result<()> {
    let names = match only {
        Some(name) => vec![name.to_string()],
        None => manager.store_names(),
    };
    for name in names {
        let meta = manager
            .metadata(&name)
            .with_context(|| format!("reading store {}", name))?;
        println!(
            "{} ({}, {}, {})",
            meta.name,
            meta.purpose,
            if meta.asymmetric { "asymmetric" } else { "symmetric" },
            if meta.encrypted { "encrypted" } else { "plaintext" },
        );
        for v in &meta.versions {
            println!(
                "  v{:<4} {:<8} {}",
                v.version,
                v.status.to_string(),
                v.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let manager = build_manager(&cli)?;

    match cli.command {
        Commands::Init => {
            manager.init()?;
            cmd_status(&manager, None)
        }
        Commands::Rotate => {
            manager.rotate()?;
            cmd_status(&manager, None)
        }
        Commands::Status { store } => cmd_status(&manager, store.as_deref()),
        Commands::AddKey { store, primary } => {
            let version = manager.add_key(&store, primary)?;
            println!("added {} v{}", store, version);
            Ok(())
        }
        Commands::Promote {
            store,
            version,
            to_primary,
        } => {
            if to_primary {
                let prior = manager.promote_to_primary(&store, version)?;
                println!("{} v{} is PRIMARY (was v{})", store, version, prior);
            } else {
                let status = manager.promote(&store, version)?;
                println!("{} v{} is {}", store, version, status);
            }
            Ok(())
        }
        Commands::Demote {
            store,
            version,
            promote_instead,
        } => {
            let status = manager.demote(&store, version, promote_instead)?;
            println!("{} v{} is {}", store, version, status);
            Ok(())
        }
        Commands::Revoke { store, version } => {
            manager.revoke(&store, version)?;
            println!("revoked {} v{}", store, version);
            Ok(())
        }
        Commands::ExportPublic { store } => {
            let count = manager.export_public_keys(&store)?;
            println!("exported {} public keys for {}", count, store);
            Ok(())
        }
        Commands::Rewrap { store } => {
            let count = manager.rewrap(&store)?;
            println!("rewrapped {} versions of {}", count, store);
            Ok(())
        }
        Commands::Encrypt {
            input,
            output,
            store,
            version,
            for_store,
        } => {
            let plaintext = read_input(&input)?;
            let facade = facade(&manager, store)?;
            let ciphertext = match (for_store, version) {
                (Some(target), _) => facade.encrypt_for(&target, &plaintext)?,
                (None, Some(version)) => facade.encrypt_with_version(&plaintext, version)?,
                (None, None) => facade.encrypt(&plaintext)?,
            };
            write_output(&output, &ciphertext)
        }
        Commands::Decrypt {
            input,
            output,
            store,
        } => {
            let ciphertext = read_input(&input)?;
            if ciphertext.is_empty() {
                bail!("{} is empty", input.display());
            }
            let plaintext = facade(&manager, store)?.decrypt(&ciphertext)?;
            write_output(&output, &plaintext)
        }
    }
}

fn main() {
    init_tracing();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
