//! # trellis-cli
//!
//! The `trellis` command surface. Migration definitions are compiled into the
//! application, so an application embeds this crate and passes its own
//! registry:
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = MigrationRegistry::new().with::<CreateUsers>("2025-01-01T00.00.00.000000");
//!     let ok = trellis_cli::execute(Cli::parse(), registry).await?;
//!     std::process::exit(if ok { 0 } else { 1 });
//! }
//! ```

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, MigrateCommands};

use std::io;
use trellis_core::{init_logging, ConfigTrait, TrellisConfig};
use trellis_migrations::MigrationRegistry;

use commands::migrate;

/// Execute a parsed command against the environment configuration.
///
/// Returns the aggregate result; `false` means at least one migration failed
/// or there was nothing to revert.
pub async fn execute(cli: Cli, registry: MigrationRegistry) -> anyhow::Result<bool> {
    let config = TrellisConfig::from_env()?;
    config.logging.validate()?;

    if let Err(e) = init_logging(&config.logging) {
        // The embedding application may have installed a subscriber already.
        tracing::debug!("{}", e);
    }

    let mut out = io::stdout();

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Make { name, dir } => {
                let dir = dir.unwrap_or_else(|| config.migrations.common_dir.clone());
                migrate::make(&name, &dir, &config.migrations.extension, &mut out)?;
                Ok(true)
            }
            MigrateCommands::Run { json } => {
                let runner = migrate::build_runner(&config, registry).await?;
                migrate::run(&runner, json, &mut out).await
            }
            MigrateCommands::Revert { json } => {
                let runner = migrate::build_runner(&config, registry).await?;
                migrate::revert(&runner, json, &mut out).await
            }
            MigrateCommands::Status { json } => {
                let runner = migrate::build_runner(&config, registry).await?;
                migrate::status(&runner, json, &mut out).await
            }
        },
    }
}
