use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "whatsapp-hotel-bot")]
#[command(author, version, about = "Multi-tenant WhatsApp guest messaging backend for hotels")]
pub struct Cli {
    /// YAML config file; a missing file means environment-only configuration
    #[arg(long, short = 'c', env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Run migrations, then serve the API and background workers
    #[default]
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or_default()
    }
}
