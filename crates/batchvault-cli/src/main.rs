//! batchvault CLI
//!
//! Offline inspection and maintenance of a batchvault storage root.

use anyhow::{Context, Result};
use batchvault_core::ServiceConfig;
use batchvault_indexer::{Indexer, LoadSource, SnapshotStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "batchvault")]
#[command(about = "batchvault - versioned storage for committed batches")]
#[command(version)]
struct Cli {
    /// Storage root (default: from the config file)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one version of an artifact
    Get {
        /// Logical name, e.g. data/part-0.csv
        name: String,

        /// Version to show (default: latest)
        #[arg(short, long)]
        version: Option<i64>,

        /// Print only the stored file path
        #[arg(long)]
        path: bool,
    },

    /// Show every version of an artifact
    History {
        /// Logical name
        name: String,
    },

    /// List indexed artifacts
    List,

    /// Rebuild the index from storage and persist it
    Rebuild,

    /// Ingest a committed folder by hand
    Ingest {
        /// Folder containing a COMMIT file
        folder: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt().with_target(false).init();
    }

    let cli = Cli::parse();
    let storage = cli
        .storage
        .unwrap_or_else(|| ServiceConfig::load().storage_dir);

    match cli.command {
        Commands::Get {
            name,
            version,
            path,
        } => cmd_get(&storage, &name, version, path),
        Commands::History { name } => cmd_history(&storage, &name),
        Commands::List => cmd_list(&storage),
        Commands::Rebuild => cmd_rebuild(&storage).await.map(drop),
        Commands::Ingest { folder } => cmd_ingest(&storage, &folder).await.map(drop),
    }
}

/// Load the index of a storage root without writing anything
fn open(storage: &Path) -> Result<Indexer> {
    if !storage.is_dir() {
        anyhow::bail!("Storage root {} does not exist", storage.display());
    }
    let (indexer, source) = SnapshotStore::new(storage)
        .load_or_rebuild()
        .with_context(|| format!("Failed to load index from {}", storage.display()))?;
    if source == LoadSource::Rebuilt {
        eprintln!("note: no usable snapshot, index rebuilt from storage");
    }
    Ok(indexer)
}

fn cmd_get(storage: &Path, name: &str, version: Option<i64>, path_only: bool) -> Result<()> {
    let indexer = open(storage)?;
    let entry = indexer.get(name, version)?;

    if path_only {
        println!("{}", indexer.resolve(entry).display());
    } else {
        println!("{}", name);
        println!("  Version:  {}", entry.version);
        println!("  Commit:   {}", entry.commit);
        println!("  Stored:   {}", indexer.resolve(entry).display());
    }

    Ok(())
}

fn cmd_history(storage: &Path, name: &str) -> Result<()> {
    let indexer = open(storage)?;
    let history = indexer.history(name)?;

    println!("{} ({} versions)", name, history.len());
    for entry in history {
        println!("  v{:<6} commit {:<6} {}", entry.version, entry.commit, entry.url);
    }

    Ok(())
}

fn cmd_list(storage: &Path) -> Result<()> {
    let indexer = open(storage)?;
    let index = indexer.index();

    if index.is_empty() {
        println!("No artifacts indexed.");
        return Ok(());
    }

    for (name, history) in index.iter() {
        let latest = history.last().map_or(0, |e| e.version);
        println!("{:<48} latest v{} ({} versions)", name, latest, history.len());
    }
    println!();
    println!("{} artifacts, {} versions", index.len(), index.entry_count());

    Ok(())
}

async fn cmd_rebuild(storage: &Path) -> Result<Indexer> {
    let indexer = Indexer::rebuilt(storage)
        .with_context(|| format!("Failed to rebuild index from {}", storage.display()))?;
    SnapshotStore::new(storage)
        .persist(&indexer)
        .await
        .context("Failed to persist index")?;

    println!(
        "✓ Rebuilt index: {} artifacts, {} versions",
        indexer.index().len(),
        indexer.index().entry_count()
    );

    Ok(indexer)
}

async fn cmd_ingest(storage: &Path, folder: &Path) -> Result<Indexer> {
    let mut indexer = open(storage)?;
    let report = indexer.ingest(folder)?;

    SnapshotStore::new(storage)
        .persist(&indexer)
        .await
        .context("Failed to persist index")?;

    println!(
        "✓ Ingested {} as commit {}: {} files stored",
        folder.display(),
        report.commit,
        report.committed.len()
    );
    for (path, error) in &report.failed {
        println!("  ✗ {}: {}", path.display(), error);
    }

    if !report.is_complete() {
        anyhow::bail!("{} files were left in staging", report.failed.len());
    }

    Ok(indexer)
}
