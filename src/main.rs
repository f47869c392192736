//! DBotX Follow-Trade Keeper
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Liquidation happens at market; there is no guarantee on execution
//!   price or slippage outcome.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use dbotx_keeper::config::Config;
use dbotx_keeper::dbotx::DbotxClient;
use dbotx_keeper::keeper::Keeper;
use dbotx_keeper::store::{FileWatermarkStore, WatermarkStore};

/// DBotX follow-trade keeper - mirrors a target wallet's buys and
/// liquidates each position after a delay
#[derive(Parser)]
#[command(name = "keeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the keeper
    Start,

    /// Show current configuration (secrets masked)
    Config,

    /// Show the persisted liquidation watermark
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dbotx_keeper=info".parse().unwrap()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Start => start(&config).await,
        Commands::Config => {
            println!("{}", config.masked_display());
            Ok(())
        }
        Commands::Status => status(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Start the keeper and run until interrupted
async fn start(config: &Config) -> Result<()> {
    info!(
        "Starting keeper: chain={}, target={}, sell delay={}s",
        config.wallet.chain, config.wallet.target_wallet, config.keeper.sell_delay_seconds
    );

    let source = Arc::new(DbotxClient::new(
        &config.api,
        config.wallet.clone(),
        config.sell.clone(),
    )?);
    let store = Arc::new(FileWatermarkStore::new(&config.keeper.watermark_path));

    let keeper = Arc::new(Keeper::new(source, store, config.keeper.clone()));

    let run_keeper = keeper.clone();
    let mut handle = tokio::spawn(async move { run_keeper.run().await });

    tokio::select! {
        res = &mut handle => {
            // The loops only end on shutdown, so finishing here means
            // startup failed
            res??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            keeper.stop();
        }
    }

    handle.await??;
    Ok(())
}

/// Print the persisted watermark
async fn status(config: &Config) -> Result<()> {
    let store = FileWatermarkStore::new(&config.keeper.watermark_path);
    let watermark = store.load().await?;

    let when = chrono::DateTime::from_timestamp_millis(watermark)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "invalid timestamp".to_string());

    println!("Last liquidated at: {} ({})", watermark, when);
    Ok(())
}
