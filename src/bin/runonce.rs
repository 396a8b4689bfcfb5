use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use runonce::{FileStore, Migrator, MigratorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runonce")]
#[command(about = "Operator tooling for a runonce changelog stored on disk")]
struct Cli {
    /// Root directory of the file store
    #[arg(long)]
    dir: PathBuf,
    /// JSON configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the ledger table name from the configuration
    #[arg(long)]
    table: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List applied change sets and the lock state
    Status,
    /// Create the ledger table if it is missing
    Provision,
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Show who holds the lock
    Status,
    /// Take the lock using the configured wait policy
    Acquire {
        /// Identity recorded as the holder
        #[arg(long)]
        holder: Option<String>,
    },
    /// Delete the lock record, e.g. after a crashed run
    Release,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let migrator = open_migrator(&cli.dir, cli.config.as_deref(), cli.table.as_deref())?;

    match cli.command {
        Command::Status => status(&migrator).await,
        Command::Provision => {
            migrator.provision().await?;
            println!("Ledger table '{}' ready", migrator.config().ledger_table_name);
            Ok(())
        }
        Command::Lock { action } => match action {
            LockAction::Status => lock_status(&migrator).await,
            LockAction::Acquire { holder } => lock_acquire(migrator, holder).await,
            LockAction::Release => {
                migrator.release_lock().await?;
                println!("Lock released");
                Ok(())
            }
        },
    }
}

fn open_migrator(dir: &Path, config: Option<&Path>, table: Option<&str>) -> Result<Migrator> {
    let mut config = match config {
        Some(path) => MigratorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display()))?,
        None => MigratorConfig::default(),
    };
    if let Some(table) = table {
        config = config.ledger_table_name(table);
    }

    let store = FileStore::open(dir)
        .with_context(|| format!("Failed to open store at '{}'", dir.display()))?;
    Ok(Migrator::new(Arc::new(store), config)?)
}

async fn status(migrator: &Migrator) -> Result<()> {
    let entries = migrator.ledger().entries().await?;
    println!(
        "{} change set(s) applied in '{}':",
        entries.len(),
        migrator.config().ledger_table_name
    );
    for entry in &entries {
        println!(
            "  {:<24} {:<16} {}  {}/{}",
            entry.id,
            entry.author,
            entry.timestamp.to_rfc3339(),
            entry.origin_name,
            entry.unit_name
        );
    }
    lock_status(migrator).await
}

async fn lock_status(migrator: &Migrator) -> Result<()> {
    match migrator.lock().holder().await? {
        Some(lock) => println!(
            "Lock held by '{}' since {}",
            lock.author,
            lock.timestamp.to_rfc3339()
        ),
        None => println!("Lock is free"),
    }
    Ok(())
}

async fn lock_acquire(migrator: Migrator, holder: Option<String>) -> Result<()> {
    let migrator = match holder {
        Some(holder) => migrator.with_holder(holder),
        None => migrator,
    };

    if migrator.acquire_lock().await? {
        println!("Lock acquired; release it with `runonce lock release`");
        Ok(())
    } else {
        Err(anyhow!("Lock is held by another process"))
    }
}
