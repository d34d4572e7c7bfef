//! vpnmon main entry point
//!
//! This binary exposes the administrative commands: ledger setup, usage
//! collection and reporting, reconciliation, the peer lifecycle and the
//! periodic collector.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vpnmon::config::{Config, DEFAULT_CONFIG_PATH};
use vpnmon::ledger::{Ledger, YearMonth};
use vpnmon::lifecycle::{DeletionReport, LifecycleLock, PeerManager};
use vpnmon::reconcile::Reconciler;
use vpnmon::scheduler::Scheduler;
use vpnmon::security::{validate_private_file, warn_if_unprivileged};
use vpnmon::wireguard::{InterfaceGateway, PublicKey, WgGateway};
use vpnmon::{report, APP_NAME, VERSION};

/// WireGuard peer registry and usage accounting
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the ledger schema, upgrading older databases
    Setup,

    /// Record one traffic sample for every registered peer
    Collect,

    /// Show recorded usage
    Usage {
        /// Only this peer's public key
        #[arg(long)]
        peer: Option<PublicKey>,

        /// Month as YYYY-MM
        #[arg(long)]
        month: Option<YearMonth>,

        /// Sum every month up to and including --month
        #[arg(long)]
        accumulated: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Compare the interface with the ledger
    Sync {
        /// Apply corrective actions
        #[arg(long)]
        fix: bool,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Create a peer and print its client configuration
    GeneratePeer {
        /// Display name
        name: String,

        /// Contact email
        email: String,
    },

    /// Change a peer's name or email
    UpdatePeer {
        /// Peer public key
        key: PublicKey,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New contact email
        #[arg(long)]
        email: Option<String>,
    },

    /// Delete every peer registered with an email, or one peer by key
    DeletePeer {
        /// Contact email
        #[arg(required_unless_present = "key", conflicts_with = "key")]
        email: Option<String>,

        /// Peer public key
        #[arg(long)]
        key: Option<PublicKey>,

        /// Keep the peer's monthly usage rows
        #[arg(long)]
        keep_usage_history: bool,
    },

    /// Run the periodic collector until interrupted
    Schedule,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing; reports go to stdout
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Shared handles for one invocation
struct App {
    config: Config,
    ledger: Ledger,
    gateway: Arc<dyn InterfaceGateway>,
    lock: Arc<LifecycleLock>,
}

impl App {
    async fn open(config: Config) -> anyhow::Result<Self> {
        let ledger = Ledger::open(&config.ledger.database_path()).await?;
        ledger.setup().await?;

        let gateway: Arc<dyn InterfaceGateway> = Arc::new(WgGateway::new(&config.interface));
        let lock = Arc::new(LifecycleLock::new(config.ledger.lock_path()));

        Ok(Self {
            config,
            ledger,
            gateway,
            lock,
        })
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.gateway.clone(),
            self.ledger.clone(),
            self.lock.clone(),
            self.config.reconcile.authority,
        )
    }

    fn peer_manager(&self) -> PeerManager {
        PeerManager::new(
            self.gateway.clone(),
            self.ledger.clone(),
            self.lock.clone(),
            self.config.client.clone(),
        )
    }
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("{} v{}", APP_NAME, VERSION);
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    info!("Starting {} v{} (interface {})", APP_NAME, VERSION, config.interface.name);
    let app = App::open(config).await?;

    let result = dispatch(&app, cli.command).await;
    app.ledger.close().await;
    result
}

async fn dispatch(app: &App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Setup => {
            let conf = app.config.interface.config_file();
            if conf.exists() {
                if let Err(e) = validate_private_file(&conf) {
                    warn!("{}", e);
                }
            }
            println!(
                "Ledger ready at {}",
                app.config.ledger.database_path().display()
            );
            Ok(())
        }

        Commands::Collect => {
            warn_if_unprivileged("collect");
            let collection = app.reconciler().collect(YearMonth::current()).await?;
            println!("{}", report::collection_summary(&collection));
            if !collection.is_complete() {
                anyhow::bail!(
                    "{} sample(s) failed to persist",
                    collection.failures.len()
                );
            }
            Ok(())
        }

        Commands::Usage {
            peer,
            month,
            accumulated,
            json,
        } => {
            let rows = app
                .ledger
                .query_usage(peer.as_ref(), month, !accumulated)
                .await?;
            if json {
                println!("{}", report::usage_json(&rows)?);
            } else if rows.is_empty() {
                println!("No usage data found");
            } else {
                print!("{}", report::usage_table(&rows, accumulated));
            }
            Ok(())
        }

        Commands::Sync { fix, json } => {
            warn_if_unprivileged("sync");
            let sync = app.reconciler().run(fix).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sync)?);
            } else {
                print!("{}", report::sync_summary(&sync));
            }

            if let Some(conflict) = sync.conflict_error() {
                return Err(conflict.into());
            }
            if sync.has_failures() {
                anyhow::bail!(
                    "{} of {} corrective actions failed",
                    sync.actions.len() - sync.fixed_count(),
                    sync.actions.len()
                );
            }
            Ok(())
        }

        Commands::GeneratePeer { name, email } => {
            warn_if_unprivileged("generate-peer");
            let manager = app.peer_manager();
            let created = manager.create_peer(&name, &email).await?;

            println!("{}", created.client_config);
            match manager.save_client_config(&created).await {
                Ok(Some(path)) => println!("Client configuration saved to {}", path.display()),
                Ok(None) => {}
                Err(e) => warn!("Peer created, but saving its configuration failed: {}", e),
            }
            Ok(())
        }

        Commands::UpdatePeer { key, name, email } => {
            let peer = app
                .peer_manager()
                .update_peer(&key, name.as_deref(), email.as_deref())
                .await?;
            println!(
                "Updated {}: name={}, email={}",
                peer.public_key,
                peer.name.as_deref().unwrap_or("-"),
                peer.email.as_deref().unwrap_or("-")
            );
            Ok(())
        }

        Commands::DeletePeer {
            email,
            key,
            keep_usage_history,
        } => {
            warn_if_unprivileged("delete-peer");
            let manager = app.peer_manager();
            let deletion = match (key, email) {
                (Some(key), _) => manager.delete_by_key(&key, keep_usage_history).await?,
                (None, Some(email)) => manager.delete_by_email(&email, keep_usage_history).await?,
                (None, None) => anyhow::bail!("Give an email or --key"),
            };
            print_deletion(&deletion, keep_usage_history);
            if !deletion.is_complete() {
                anyhow::bail!("{} peer(s) could not be deleted", deletion.failed.len());
            }
            Ok(())
        }

        Commands::Schedule => {
            warn_if_unprivileged("schedule");
            let scheduler = Scheduler::new(Arc::new(app.reconciler()), app.config.scheduler.interval())
                .with_drift_report(app.config.scheduler.report_drift);
            let stats = scheduler.run(shutdown_signal()).await;
            info!(
                "Collector stopped: {} ticks, {} failed, {} samples recorded",
                stats.ticks, stats.failed_ticks, stats.samples_recorded
            );
            Ok(())
        }

        Commands::Version => Ok(()),
    }
}

fn print_deletion(deletion: &DeletionReport, keep_history: bool) {
    for key in &deletion.removed {
        if keep_history {
            println!("Deleted {} (usage history kept)", key);
        } else {
            println!("Deleted {}", key);
        }
    }
    for (key, reason) in &deletion.failed {
        println!("Failed to delete {}: {}", key, reason);
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
