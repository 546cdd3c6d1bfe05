use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "trellis")]
#[command(about = "Database migration tooling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migrations
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum MigrateCommands {
    /// Apply every pending migration
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Revert the last batch of migrations
    Revert {
        /// Print the revert report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show applied, pending and missing migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    Make {
        /// Migration name, e.g. "create users"
        name: String,

        /// Target directory (defaults to the common migrations directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}
