//! thermolog Binary Entry Point
//!
//! Runs the collector loop, the JSON API, or one of the administrative
//! commands. Core functionality is provided by the `thermolog` library crate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thermolog::{
    CollectionScheduler, CollectorContext, StorageBuilder, StorageHandles,
    config::{AppConfig, parse_duration},
    server::{AppState, create_router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// thermolog - Temperature Collection and History
#[derive(Parser, Debug)]
#[command(name = "thermolog", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "config/config.yaml",
        env = "THERMOLOG_CONFIG"
    )]
    config: PathBuf,

    /// Database file (overrides config file)
    #[arg(long, env = "THERMOLOG_DB_PATH")]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic collection loop
    Collect {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Collection interval (overrides config file, e.g. "2m")
        #[arg(long, value_parser = parse_duration)]
        interval: Option<Duration>,
    },
    /// Serve the JSON API
    Serve,
    /// Show row counts and time span per table
    Status,
    /// Delete readings older than N days
    Prune {
        /// Retention in days (defaults to database.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete every reading
    Wipe {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Check every configured source and print its availability
    Sensors,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,thermolog=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Command::Collect {
        interval: Some(interval),
        ..
    } = &cli.command
    {
        config.collection.interval = *interval;
        config.validate()?;
    }

    match cli.command {
        Command::Collect { once, .. } => collect(config, once).await,
        Command::Serve => serve(config).await,
        Command::Status => status(config).await,
        Command::Prune { days } => prune(config, days).await,
        Command::Wipe { yes } => wipe(config, yes).await,
        Command::Sensors => sensors(config),
    }
}

async fn open_storage(config: &AppConfig) -> Result<StorageHandles, Box<dyn std::error::Error>> {
    tracing::info!("Initializing storage at: {}", config.database.path.display());
    let handles = StorageBuilder::new(&config.database.path).build().await?;
    Ok(handles)
}

async fn collect(config: AppConfig, once: bool) -> Result<(), Box<dyn std::error::Error>> {
    let context = CollectorContext::from_config(&config.collection)?;
    let handles = open_storage(&config).await?;

    let scheduler = CollectionScheduler::new(
        context,
        handles.writer.clone(),
        config.collection.interval,
    )
    .with_retention(handles.admin.clone(), config.database.retention_days);

    if once {
        let result = scheduler.run_cycle().await;
        handles.shutdown().await?;
        let report = result?;
        println!(
            "cycle at {}: {} readings, {} absent, {} failed, {} rows written",
            report.timestamp,
            report.succeeded,
            report.absent,
            report.failed,
            report.written.total()
        );
        return Ok(());
    }

    let scheduler = scheduler.spawn();
    tracing::info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    tracing::info!("Shutting down scheduler...");
    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Failed to shutdown scheduler: {}", e);
    }

    tracing::info!("Shutting down storage...");
    handles.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handles = open_storage(&config).await?;

    let app = create_router(AppState {
        aggregator: handles.aggregator.clone(),
        config: config.summary(),
    });

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    tracing::info!("Web server listening on: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down storage...");
    handles.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn status(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handles = open_storage(&config).await?;
    let result = handles.admin.status().await;
    handles.shutdown().await?;
    let status = result?;

    println!("database: {}", config.database.path.display());
    if let Some(size) = status.size_bytes {
        println!("size: {:.2} MiB", size as f64 / (1024.0 * 1024.0));
    }
    for table in &status.tables {
        let span = match (table.oldest, table.newest) {
            (Some(oldest), Some(newest)) => format!("{oldest} .. {newest}"),
            _ => "empty".to_string(),
        };
        println!("{:<18} {:>10} rows  {}", table.table.as_ref(), table.rows, span);
    }
    println!("total: {} rows", status.total_rows());
    Ok(())
}

async fn prune(config: AppConfig, days: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    let days = days.unwrap_or(config.database.retention_days);
    if days == 0 {
        return Err("retention of 0 days would delete everything; use `wipe --yes`".into());
    }

    let handles = open_storage(&config).await?;
    let result = handles.admin.prune(days).await;
    handles.shutdown().await?;
    let deleted = result?;

    println!(
        "deleted {} rows older than {} days (core {}, storage {}, external {})",
        deleted.total(),
        days,
        deleted.core,
        deleted.storage,
        deleted.external
    );
    Ok(())
}

async fn wipe(config: AppConfig, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !yes {
        return Err("refusing to delete every reading without --yes".into());
    }

    let handles = open_storage(&config).await?;
    let result = handles.admin.wipe().await;
    handles.shutdown().await?;
    let deleted = result?;

    println!("deleted {} rows", deleted.total());
    Ok(())
}

fn sensors(mut config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Check configured external sensors even when collection of them is off.
    config.collection.sensors.external_sensors = true;
    let context = CollectorContext::from_config(&config.collection)?;

    for (role, plugin) in context.sources() {
        let mark = if plugin.is_available() { "ok" } else { "unavailable" };
        println!(
            "{:<9} {:<24} {:<12} {}",
            role.as_ref(),
            plugin.name(),
            mark,
            serde_json::to_string(&plugin.info())?
        );
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
