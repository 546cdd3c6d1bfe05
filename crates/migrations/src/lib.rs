//! # trellis-migrations: versioned schema changes
//!
//! Discovers migration files in the framework, common and module roots,
//! matches them to compiled-in definitions through a [`MigrationRegistry`],
//! and applies or reverts them in timestamp order while recording each
//! applied file in a [`Ledger`].
//!
//! ```rust,ignore
//! let registry = MigrationRegistry::new()
//!     .with::<CreateUsers>("2025-01-01T00.00.00.000000")
//!     .with::<CreatePosts>("2025-01-02T00.00.00.000000");
//!
//! let runner = MigrationRunner::new(paths, registry, ledger, connector);
//! let ok = runner.run().await?;
//! ```

pub mod adapter;
pub mod definitions;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod registry;
pub mod rollback;
pub mod runner;
pub mod scaffold;
pub mod schema_builder;

pub use adapter::{AdapterTransaction, DatabaseAdapter, DatabaseConnector, DatabaseValue};
pub use definitions::{
    MigrationDirection, MigrationOutcome, MigrationState, MigrationStatusEntry, OutcomeStatus,
    RunReport,
};
pub use descriptor::MigrationDescriptor;
pub use discovery::MigrationPaths;
pub use error::{MigrationError, MigrationResult};
pub use ledger::{next_group_id, Ledger, LedgerRecord, GROUP_ID_FORMAT};
pub use memory::{MemoryConnector, MemoryDatabase, MemoryLedger};
pub use migration::{LoadedMigration, Migration, Schema, Seeder};
pub use postgres::{PostgresAdapter, PostgresConnector, PostgresLedger};
pub use registry::{MigrationFactory, MigrationRegistry};
pub use runner::MigrationRunner;
pub use scaffold::{MigrationScaffold, TIMESTAMP_KEY_FORMAT};
pub use schema_builder::{Blueprint, DropKind, SchemaBuilder, Statement};
