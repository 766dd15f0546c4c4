//! Chatwarden CLI - run the service, initialise the database, show status

use std::sync::Arc;

use chatwarden::{Config, Service};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chatwarden", version, about = "Group-chat analytics and retrieval bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service with all background workers
    Serve,
    /// Initialise the database schema and exit
    Init,
    /// Print database health and queue dashboards
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => {
            let service = Service::build(config)?;

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                    signal_token.cancel();
                }
            });

            // The chat platform transport plugs in here; without one the
            // workers still drain queues and log outbound replies.
            let transport = Arc::new(chatwarden::transport::NullTransport);
            service.run(transport, shutdown).await?;
        }
        Commands::Init => {
            let service = Service::build(config.clone())?;
            service
                .database()
                .initialize(config.embedding_dim, &config.fts_config)
                .await?;
            println!("Database initialised");
        }
        Commands::Status => {
            let service = Service::build(config.clone())?;
            let health = service.database().health_check().await?;
            println!(
                "database: {}",
                if health.is_healthy { "ok".to_string() } else { health.message }
            );
        }
    }

    Ok(())
}
