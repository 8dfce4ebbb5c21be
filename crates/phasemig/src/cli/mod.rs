mod database;
mod logging;
mod prompt;
mod reporter;

pub use database::DatabaseCommand;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use phasemig_core::PhasemigConfig;

/// phasemig - phased SQL migrations for MSSQL, MySQL and Postgres
#[derive(Parser)]
#[command(name = "phasemig")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (ignored if it does not exist).
    #[arg(long, default_value = "phasemig.toml", global = true)]
    pub config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Database commands.
    Database(DatabaseCommand),
}

impl Cli {
    /// Execute the CLI command. `Ok(false)` means the run itself failed.
    pub async fn execute(self) -> Result<bool> {
        let config = PhasemigConfig::load_optional(&self.config)?;
        logging::init(&config.logging, self.verbose);

        match self.command {
            Commands::Database(cmd) => cmd.execute(&config).await,
        }
    }
}
