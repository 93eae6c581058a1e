use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod server;

#[derive(Parser)]
#[command(name = "shardfs")]
#[command(author, version, about = "Network filesystem with a chunked block engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a default configuration file
    Init {
        #[arg(default_value = "shardfs.toml")]
        path: PathBuf,
    },
    /// Run the volume API server
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Serve from an in-memory store; all data is lost on exit
        #[arg(long)]
        ephemeral: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
