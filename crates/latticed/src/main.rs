//! latticed — the Lattice daemon.
//!
//! Single binary that assembles the data-access core and the service
//! registry:
//! - SQLite connection pool + query cache
//! - Service registry with background health monitoring
//!
//! # Usage
//!
//! ```text
//! latticed run --config lattice.toml
//! latticed check --config lattice.toml
//! ```

mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use lattice_db::Database;
use lattice_registry::ServiceRegistry;

use crate::config::LatticeConfig;

#[derive(Parser)]
#[command(name = "latticed", about = "Lattice data-access and service-health daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: open the pool and monitor registered services.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "lattice.toml")]
        config: PathBuf,

        /// Write the registry state to this path on shutdown.
        #[arg(long)]
        export_on_shutdown: Option<PathBuf>,
    },
    /// Probe every configured service once and print the results.
    Check {
        /// Path to the TOML configuration file.
        #[arg(long, default_value = "lattice.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,latticed=debug,lattice=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            export_on_shutdown,
        } => run(config, export_on_shutdown).await,
        Command::Check { config } => check(config).await,
    }
}

async fn run(config_path: PathBuf, export_on_shutdown: Option<PathBuf>) -> anyhow::Result<()> {
    let config = LatticeConfig::load(&config_path)?;

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(config.database_config());

    let registry = ServiceRegistry::new(config.registry_config());
    for service in &config.registry.services {
        registry.register(service.clone());
    }
    registry.start();

    info!("latticed running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    registry.stop().await;
    if let Some(path) = export_on_shutdown {
        registry.export_config(&path)?;
    }

    let stats = db.stats();
    info!(
        total_requests = stats.total_requests,
        cache_hit_ratio = stats.cache_hit_ratio,
        "final pool statistics"
    );
    db.close();
    Ok(())
}

async fn check(config_path: PathBuf) -> anyhow::Result<()> {
    let config = LatticeConfig::load(&config_path)?;

    let registry = ServiceRegistry::new(config.registry_config());
    for service in &config.registry.services {
        registry.register(service.clone());
    }

    let (healthy, total) = registry.check_now().await;
    for (name, health) in registry.all_health() {
        println!(
            "{name}: {} ({:.1}ms, {:.1}% uptime)",
            health.status, health.response_time_ms, health.uptime_percentage
        );
        if let Some(error) = &health.error_message {
            println!("  error: {error}");
        }
    }
    println!("{healthy}/{total} services healthy");
    Ok(())
}
