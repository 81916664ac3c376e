use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use docshift::config::{read_config, write_config, MigrationConfig};
use docshift::migration::{DocumentRecordStore, MigrationLock, MigrationRecordStore};
use docshift::store::FileStore;
use docshift::utils::CONFIG_FILE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const LOG_ENV: &str = "DOCSHIFT_LOG";

/// Docshift - operator tool for document database migrations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the configuration file
    #[arg(short, long, env = "DOCSHIFT_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    /// File-backed store to operate on. Overrides `storePath` from the
    /// configuration file.
    #[arg(short, long, env = "DOCSHIFT_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List migration records, recorded failures and the lock holder
    Status,
    /// Mark a recorded migration failure as fixed so the next run continues
    MarkFixed {
        /// Record id, e.g. migrationrecord/add/full/name/3
        id: String,
    },
    /// Remove the migration lock whoever holds it
    ReleaseLock,
    /// Write a configuration file with default values
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    if let Command::InitConfig = args.command {
        return init_config(&args.config).await;
    }

    let config = read_config(&args.config)
        .await
        .with_context(|| format!("reading {}", args.config.display()))?
        .unwrap_or_default();

    let Some(store_path) = args.store.clone().or_else(|| config.store_path.clone()) else {
        bail!(
            "no store configured; pass --store or set storePath in {}",
            args.config.display()
        );
    };
    let store = Arc::new(FileStore::new(store_path));

    match args.command {
        Command::Status => status(store).await,
        Command::MarkFixed { id } => mark_fixed(store, &id).await,
        Command::ReleaseLock => release_lock(store).await,
        Command::InitConfig => Ok(()),
    }
}

async fn init_config(path: &Path) -> anyhow::Result<()> {
    if read_config(path).await?.is_some() {
        warn!(path = %path.display(), "Configuration file already exists, leaving it unchanged");
        return Ok(());
    }

    write_config(path, &MigrationConfig::default()).await?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

async fn status(store: Arc<FileStore>) -> anyhow::Result<()> {
    let records = DocumentRecordStore::new(store.clone()).list().await?;

    if records.is_empty() {
        println!("No migrations recorded in {}", store.path().display());
    }
    for record in &records {
        let state = match &record.error {
            None => "applied".to_string(),
            Some(failure) if failure.is_fixed => format!("failed during {} (fixed)", failure.direction),
            Some(failure) => format!("FAILED during {}: {}", failure.direction, failure.message),
        };
        println!("{}  {}  {}", record.run_on.to_rfc3339(), record.id, state);
    }

    match MigrationLock::new(store).holder().await? {
        None => println!("Lock: free"),
        Some(holder) => {
            let expired = holder.is_expired(chrono::Utc::now());
            match holder.lease {
                Some(lease) => println!(
                    "Lock: held by {} until {}{}",
                    lease.owner,
                    lease.expires_at.to_rfc3339(),
                    if expired { " (expired)" } else { "" }
                ),
                None => println!("Lock: held (unrecognized value, index {})", holder.index),
            }
        }
    }
    Ok(())
}

async fn mark_fixed(store: Arc<FileStore>, id: &str) -> anyhow::Result<()> {
    if !DocumentRecordStore::new(store).mark_fixed(id).await? {
        bail!("no failed migration record with id {}", id);
    }
    info!(id = %id, "Marked migration failure as fixed");
    Ok(())
}

async fn release_lock(store: Arc<FileStore>) -> anyhow::Result<()> {
    if MigrationLock::new(store).force_release().await? {
        info!("Released migration lock");
    } else {
        info!("Migration lock was not held");
    }
    Ok(())
}
