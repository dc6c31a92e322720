//! ephemeral-pg - start a throwaway PostgreSQL from the command line.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ephemeral_pg::{HarnessConfig, LifecycleManager, PostgresVersion, runtime::check_docker};

#[derive(Debug, Parser)]
#[command(name = "ephemeral-pg", version, about = "Disposable PostgreSQL in Docker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a PostgreSQL container, print its URL and remove it on Ctrl-C.
    Up {
        /// Image tag: latest or 11 through 16.
        #[arg(long, default_value = "latest")]
        version: PostgresVersion,

        /// Seconds to wait for the server to accept connections.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Check whether Docker is installed and running.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ephemeral_pg=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Up { version, timeout } => {
            let mut config = HarnessConfig::resolve()?;
            if let Some(secs) = timeout {
                config = config.with_ready_timeout(Duration::from_secs(secs));
            }

            let manager = LifecycleManager::connect(config).await?;
            let session = manager.postgres(version, |endpoint| async move {
                println!("{}", endpoint.connection_string());
                eprintln!("Press Ctrl-C to stop and remove the container");
                std::future::pending::<()>().await
            });

            // Ctrl-C during pull or readiness must drop the session too, so
            // its container is removed before the process exits.
            tokio::select! {
                result = session => result?,
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    tracing::info!("Interrupted, removing container");
                }
            }
        }
        Command::Doctor => {
            let status = check_docker().await;
            println!("Docker: {status}");
            if let Some(remedy) = status.remedy() {
                println!("Next step: {remedy}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
