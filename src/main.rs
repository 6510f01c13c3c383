//! Corral service entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use corral::api::{self, AppState};
use corral::infrastructure::{config::ConfigLoader, database::DatabaseConnection, logging};
use corral::Orchestrator;

#[derive(Parser)]
#[command(name = "corral", about = "Agent orchestration control plane", version)]
struct Cli {
    /// Explicit configuration file (replaces corral.yaml discovery).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator service.
    Serve,
    /// Apply database migrations and exit.
    Migrate,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load_with_file(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve => {
            logging::init(&config.logging).context("Failed to initialize logging")?;
            let orchestrator = Orchestrator::build(config).await?;
            let handles = orchestrator.start().await;

            let state = AppState::from_orchestrator(&orchestrator);
            let shutdown = orchestrator.shutdown_signal();
            let server = tokio::spawn(api::serve(state, shutdown));

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("shutdown signal received");

            orchestrator.shutdown().await;
            for handle in handles {
                let _ = handle.await;
            }
            let _ = server.await;
            Ok(())
        }
        Commands::Migrate => {
            let db = DatabaseConnection::new(
                &config.database.url,
                config.database.min_connections,
                config.database.max_connections,
            )
            .await
            .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to run migrations")?;
            println!("migrations applied");
            db.close().await;
            Ok(())
        }
        Commands::Config => {
            let rendered = serde_json::to_string_pretty(&config)?;
            println!("{rendered}");
            Ok(())
        }
    }
}
