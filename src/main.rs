//! `wallet-nodes`: inspect and watch the Electrum server pool.
//!
//! # Architecture Overview
//!
//! ```text
//!   wallet-nodes probe|roles|watch
//!          │
//!          ▼
//!   ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//!   │  scheduler   │────▶│  connection pool │────▶│ electrum (tcp)   │──▶ Fulcrum
//!   │ keyed, paced │     │ roles + failover │     │ JSON-RPC ping    │    servers
//!   └──────────────┘     └────────┬─────────┘     └──────────────────┘
//!                                 │
//!                                 ▼
//!                        ┌──────────────────┐
//!                        │ health repository│ (JSON file, optional)
//!                        └──────────────────┘
//! ```

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bch_wallet_net::config::load_config;
use bch_wallet_net::health::{HealthRepository, JsonFileHealthRepository};
use bch_wallet_net::observability::{logging, metrics, MetricsInstrumentation};
use bch_wallet_net::{
    ConnectionPool, ElectrumConnection, NodeConnection, NodeGateway, Priority, RequestScheduler,
    RetryPolicy,
};

#[derive(Parser)]
#[command(name = "wallet-nodes")]
#[command(about = "Probe and monitor the wallet's Electrum server pool", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "wallet-nodes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire one healthy connection and report the chosen server
    Probe,
    /// Print the current primary and standby servers
    Roles,
    /// Stream pool status while pinging at an interval
    Watch {
        #[arg(
            short,
            long,
            default_value_t = 10,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(config = %cli.config.display(), "wallet-nodes starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let slow_threshold = Duration::from_millis(config.pool.slow_latency_ms);
    let repository: Option<Arc<dyn HealthRepository>> = match &config.health.persistence_path {
        Some(path) => {
            let repository = JsonFileHealthRepository::open(path)
                .await?
                .with_slow_threshold(slow_threshold);
            Some(Arc::new(repository))
        }
        None => None,
    };

    let timeout = Duration::from_secs(config.pool.connect_timeout_secs);
    let pool = ConnectionPool::from_config(
        &config.pool,
        |endpoint| ElectrumConnection::new(endpoint, timeout),
        repository,
    )?;

    match cli.command {
        Commands::Probe => {
            let connection = pool.acquire().await?;
            println!("connected: {}", connection.label());
            print_roles(&pool).await?;
        }
        Commands::Roles => {
            print_roles(&pool).await?;
        }
        Commands::Watch { interval_secs } => {
            let scheduler = RequestScheduler::with_instrumentation(
                &config.scheduler,
                Arc::new(MetricsInstrumentation::new("wallet-nodes")),
            )?;
            let gateway = NodeGateway::new(pool.clone(), scheduler);
            watch(gateway, Duration::from_secs(interval_secs)).await;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn print_roles(pool: &ConnectionPool<ElectrumConnection>) -> Result<(), Box<dyn std::error::Error>> {
    let roles = pool.describe_roles().await?;
    let show = |url: Option<url::Url>| url.map_or_else(|| "default".to_string(), |u| u.to_string());
    println!("primary: {}", show(roles.primary));
    println!("standby: {}", show(roles.standby));
    Ok(())
}

async fn watch(gateway: NodeGateway<ElectrumConnection, &'static str>, interval: Duration) {
    let mut statuses = Box::pin(gateway.pool().observe_status());
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            Some(status) = statuses.next() => {
                println!("status: {}", status);
            }
            _ = ticker.tick() => {
                let started = tokio::time::Instant::now();
                let result = gateway
                    .call("ping", Priority::Normal, RetryPolicy::Retry, |connection| async move {
                        connection.ping().await
                    })
                    .await;
                match result {
                    Ok(()) => tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Ping succeeded"
                    ),
                    Err(error) => tracing::warn!(error = %error, "Ping failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling outstanding requests");
                gateway.scheduler().cancel_all().await;
                break;
            }
        }
    }
}
