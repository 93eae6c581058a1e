use anyhow::Result;
use shardfs::cli::{self, Commands};
use shardfs::config::Settings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse_args();
    match cli.command {
        Commands::Init { path } => {
            Settings::write_default_config(&path)?;
            println!("Configuration file created at: {}", path.display());
            println!("Edit the file and run: shardfs run -c {}", path.display());
        }
        Commands::Run { config, ephemeral } => {
            cli::server::run_server(&config, ephemeral).await?;
        }
    }

    Ok(())
}
