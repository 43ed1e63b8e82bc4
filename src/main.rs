//! smite: forwarding process supervisor
//!
//! `smite serve` restores forwards for every active tunnel in the panel
//! database, keeps them alive until shutdown, then stops them all.
//! `smite doctor` prints what `serve` would use.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use smite::forward::{spawn_watchdog, ForwardEngine};
use smite::{Config, Reconciler, Supervisors};
use smite_store::{SqliteStore, TunnelStore};

#[derive(Parser)]
#[command(name = "smite", version, about, long_about = None)]
struct Cli {
    /// Config file (default: $SMITE_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore and supervise forwards until interrupted
    Serve,
    /// Show resolved binaries and the effective config
    Doctor,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_path) = match Config::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("smite: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log.filter);

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Doctor => doctor(&config, config_path.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

async fn serve(config: Config) -> Result<()> {
    let supervisors = Supervisors::from_config(&config);

    match &config.store.database {
        Some(db) => match SqliteStore::open(db) {
            Ok(store) => {
                let store: Arc<dyn TunnelStore> = Arc::new(store);
                Reconciler::new(store, supervisors.gost.clone())
                    .with_rathole(supervisors.rathole.clone())
                    .run()
                    .await;
            }
            Err(e) => tracing::error!("Cannot open tunnel database, skipping restore: {e:#}"),
        },
        None => tracing::info!("No tunnel database configured, skipping restore"),
    }

    let token = CancellationToken::new();
    let mut watchdogs = Vec::new();
    if config.watchdog.enabled {
        let interval = config.watchdog.interval();
        watchdogs.push(spawn_watchdog(supervisors.gost.clone(), interval, token.clone()));
        watchdogs.push(spawn_watchdog(supervisors.rathole.clone(), interval, token.clone()));
    }

    tracing::info!("smite running, waiting for shutdown signal");
    shutdown_signal().await?;
    tracing::info!("Shutting down, stopping all forwards");

    token.cancel();
    for handle in watchdogs {
        if let Err(e) = handle.await {
            tracing::warn!("watchdog task ended abnormally: {e}");
        }
    }
    supervisors.cleanup_all().await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to listen for Ctrl-C")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")
}

fn doctor(config: &Config, config_path: Option<&std::path::Path>) -> Result<()> {
    match config_path {
        Some(path) if path.exists() => println!("config: {}", path.display()),
        Some(path) => println!("config: {} (not found, using defaults)", path.display()),
        None => println!("config: defaults"),
    }

    let supervisors = Supervisors::from_config(config);
    let locators = [
        supervisors.gost.engine().locator(),
        supervisors.rathole.engine().locator(),
    ];
    for locator in locators {
        match locator.resolve() {
            Ok(path) => println!("{}: {}", locator.name(), path.display()),
            Err(e) => println!("{}: {e}", locator.name()),
        }
    }

    let rendered = toml::to_string_pretty(config).context("failed to render config")?;
    println!("\n{rendered}");
    Ok(())
}
