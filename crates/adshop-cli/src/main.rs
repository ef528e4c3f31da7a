use std::sync::Arc;

use adshop_core::Source;
use adshop_storage::{IngestStore, PgStore};
use adshop_sync::{env_pipelines, ServiceConfig};
use adshop_web::AppState;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "adshop-cli")]
#[command(about = "Google Ads + Shopify ingest service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP service (default).
    Serve,
    /// Apply database migrations and exit.
    Migrate,
    /// Run a single pull for one source.
    Pull {
        /// `google-ads` or `shopify`.
        source: Source,
    },
    /// Print the dashboard JSON.
    Dashboard,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing("info");

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await?,
        Commands::Migrate => {
            let config = ServiceConfig::from_env()?;
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            store.close().await;
            info!("migrations applied");
        }
        Commands::Pull { source } => {
            let summary = adshop_sync::run_pull_once_from_env(source).await?;
            println!(
                "pull complete: run_id={} source={} fetched={} inserted={} skipped={}",
                summary.run_id, summary.source, summary.fetched, summary.inserted, summary.skipped
            );
        }
        Commands::Dashboard => {
            let data = adshop_sync::dashboard_once_from_env().await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
    }

    Ok(())
}

async fn serve() -> Result<()> {
    let config = ServiceConfig::from_env()?;
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("applying migrations")?;

    let shared: Arc<dyn IngestStore> = Arc::new(store.clone());
    let (google_ads, shopify) = env_pipelines(&config, Arc::clone(&shared))?;
    let result = adshop_web::serve(&config.bind_addr(), AppState::new(shared, google_ads, shopify)).await;

    store.close().await;
    info!("database pool closed");
    result
}
