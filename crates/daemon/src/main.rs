use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prosync_config::AppConfig;
use prosync_profiles::{ProfileDraft, ProfileStore};
use prosync_sync::{FileSyncChannel, PushSyncServer, SyncMode};

#[derive(Debug, Parser)]
#[command(
    name = "prosync",
    version,
    about = "Profile synchronization and evolution daemon"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "prosync.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the sync daemon: file watcher plus push server.
    Run,
    /// Write the current profile collection to the sync file.
    Export,
    /// Apply the sync file to the local collection.
    Import {
        #[arg(long, value_enum, default_value = "merge")]
        mode: CliSyncMode,
    },
    /// List profiles.
    List,
    /// Set the active profile.
    Use { id: String },
    /// Create a profile.
    Add {
        name: String,
        #[arg(long, default_value = "")]
        persona: String,
        #[arg(long, default_value = "")]
        tone: String,
    },
    /// Discard everything and restore the built-in defaults.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSyncMode {
    Merge,
    Replace,
}

impl From<CliSyncMode> for SyncMode {
    fn from(mode: CliSyncMode) -> Self {
        match mode {
            CliSyncMode::Merge => SyncMode::Merge,
            CliSyncMode::Replace => SyncMode::Replace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level)),
        )
        .init();

    let store = Arc::new(ProfileStore::open(config.store.db_path())?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, store).await,
        Commands::Export => {
            let channel = file_channel(&config, &store);
            channel.export_to_file().await?;
            println!("exported profiles to {}", channel.path().display());
            Ok(())
        }
        Commands::Import { mode } => {
            let channel = file_channel(&config, &store);
            channel.import_from_file(mode.into()).await?;
            let count = store.get_all().await?.list.len();
            println!("imported {}: {count} profiles", channel.path().display());
            Ok(())
        }
        Commands::List => {
            let collection = store.get_all().await?;
            for profile in &collection.list {
                let marker = if collection.active_profile_id.as_deref() == Some(profile.id.as_str())
                {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}  {}  (used {}, {} topics)",
                    profile.id,
                    profile.name,
                    profile.evolving.usage_count,
                    profile.evolving.topics.len(),
                );
            }
            Ok(())
        }
        Commands::Use { id } => {
            store.set_active(Some(&id)).await?;
            println!("active profile: {id}");
            Ok(())
        }
        Commands::Add {
            name,
            persona,
            tone,
        } => {
            let profile = store
                .add(ProfileDraft {
                    name,
                    persona,
                    tone,
                    style_guidelines: Vec::new(),
                })
                .await?;
            println!("created profile {} ({})", profile.name, profile.id);
            Ok(())
        }
        Commands::Reset { yes } => {
            if !yes && !confirm("Discard all profiles and restore defaults?")? {
                bail!("reset aborted");
            }
            store.reset().await?;
            println!("profiles reset to built-in defaults");
            Ok(())
        }
    }
}

fn file_channel(config: &AppConfig, store: &Arc<ProfileStore>) -> Arc<FileSyncChannel> {
    Arc::new(FileSyncChannel::new(
        store.clone(),
        PathBuf::from(&config.file_sync.path),
        Duration::from_millis(config.file_sync.debounce_ms),
    ))
}

async fn run_daemon(config: AppConfig, store: Arc<ProfileStore>) -> Result<()> {
    // Touch the store up front so first access seeds the defaults before any
    // channel can observe an empty collection.
    let collection = store.get_all().await?;
    info!(profiles = collection.list.len(), "profile store ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let _file_channel = if config.file_sync.enabled {
        let channel = file_channel(&config, &store);
        channel.clone().start(shutdown_rx.clone())?;
        Some(channel)
    } else {
        None
    };

    let server = if config.server.enabled {
        let server = Arc::new(PushSyncServer::new(store.clone(), config.server.port));
        server.start().await?;
        Some(server)
    } else {
        None
    };

    shutdown_signal().await;
    info!("shutting down");

    if let Some(server) = &server {
        server.stop();
    }
    let _ = shutdown_tx.send(true);
    // Give the channel loops and open push streams a moment to wind down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
