mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use fastunduh::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve(args) => fastunduh::api::run(config, args.address).await?,
        Commands::Sweep => {
            let stats = fastunduh::janitor::sweep_once(&config).await?;
            tracing::info!(
                scanned = stats.scanned,
                deleted = stats.deleted,
                failed = stats.failed,
                records_pruned = stats.records_pruned,
                "Sweep finished"
            );
        }
    }

    Ok(())
}
