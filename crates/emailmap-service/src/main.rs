use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use emailmap_core::{ChangeEvent, EmailDigest, EmailNormalization, SyncJournal, SyncOutcome};
use emailmap_service::server::{apply_event, serve};
use emailmap_service::{AppState, ServiceConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Email-to-uid index service", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the trigger endpoint
    Run {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Apply a single trigger payload read from a file
    Apply {
        #[arg(long)]
        event: PathBuf,
    },
    /// Print the index key for an email
    Digest {
        email: String,
        #[arg(long, default_value = "none")]
        normalization: EmailNormalization,
    },
    /// Show recent journal entries
    Journal {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Recompute the hash chain of the active journal file
        #[arg(long)]
        verify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { bind } => run_command(cli.config.as_deref(), bind).await,
        Commands::Apply { event } => apply_command(cli.config.as_deref(), &event).await,
        Commands::Digest {
            email,
            normalization,
        } => {
            println!("{}", EmailDigest::of(&email, normalization));
            Ok(())
        }
        Commands::Journal { limit, verify } => journal_command(cli.config.as_deref(), limit, verify),
    }
}

async fn run_command(config_path: Option<&Path>, bind: Option<SocketAddr>) -> Result<()> {
    let mut config = ServiceConfig::load(config_path)?;
    if let Some(bind) = bind {
        config.bind = bind;
    }
    let state = AppState::from_config(&config)?;
    serve(config.bind, state, async {
        let _ = signal::ctrl_c().await;
        info!("service stopping");
    })
    .await
}

async fn apply_command(config_path: Option<&Path>, event_path: &Path) -> Result<()> {
    let config = ServiceConfig::load(config_path)?;
    let state = AppState::from_config(&config)?;
    let bytes = std::fs::read(event_path)?;
    let event = ChangeEvent::from_slice(&bytes)?;
    match apply_event(&state, &event).await? {
        SyncOutcome::Unchanged => println!("unchanged"),
        SyncOutcome::Applied {
            removed, inserted, ..
        } => {
            let show = |d: Option<EmailDigest>| d.map(|d| d.to_string()).unwrap_or("-".into());
            println!("removed {}", show(removed));
            println!("inserted {}", show(inserted));
        }
    }
    Ok(())
}

fn journal_command(config_path: Option<&Path>, limit: usize, verify: bool) -> Result<()> {
    let config = ServiceConfig::load(config_path)?;
    let path = config.journal.resolved_path()?;
    if !path.exists() {
        return Err(anyhow!("no journal at {}", path.display()));
    }
    let journal = SyncJournal::open(&path, config.journal.max_bytes)?;
    if verify {
        let count = journal.verify_chain()?;
        println!("chain ok ({count} entries)");
    }
    for entry in journal.read_recent(None, Some(limit))? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}
