//! reviewflow operator CLI

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reviewflow::directory::InMemoryDirectory;
use reviewflow::store::{RequestStore, SqliteRequestStore};
use reviewflow::workflow::{Collaborators, ReviewEngine};
use reviewflow::{EngineConfig, RequestId};

#[derive(Parser)]
#[command(name = "reviewflow")]
#[command(about = "Operator tooling for the request review engine")]
#[command(version)]
struct Cli {
    /// Database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:reviewflow.db")]
    database_url: String,

    /// Engine configuration (JSON)
    #[arg(long, env = "REVIEWFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Expire stale reschedule proposals and complete finished requests
    Sweep {
        /// Evaluate as of this RFC 3339 instant instead of the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Print a request as JSON
    Show {
        /// Request ID
        request_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reviewflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let options = SqliteConnectOptions::from_str(&cli.database_url)
        .with_context(|| format!("parsing database url {}", cli.database_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    let store = Arc::new(SqliteRequestStore::new(pool));

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            tracing::info!("Migrations applied");
        }
        Commands::Sweep { now } => {
            store.migrate().await?;
            // Sweeps only touch stored requests; no directory lookups happen
            let collaborators = Collaborators::in_memory(Arc::new(InMemoryDirectory::new()));
            let engine = ReviewEngine::new(config, store, collaborators)?;
            let report = engine.sweep(now.unwrap_or_else(Utc::now)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Show { request_id } => {
            let id = RequestId::parse(&request_id)?;
            let stored = store
                .get(id)
                .await?
                .with_context(|| format!("request {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&stored.value)?);
            tracing::info!(request_id = %id, version = stored.version, "Request shown");
        }
    }

    Ok(())
}
