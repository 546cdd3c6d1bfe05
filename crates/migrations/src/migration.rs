//! Migration authoring contract
//!
//! A migration declares its schema changes; it never runs them. `up()` and
//! `down()` push statements into a [`Schema`], and the runner executes the
//! collected list afterwards. `seed()` is the one place where SQL runs
//! immediately, through [`Seeder::insert`].
//!
//! ```rust,ignore
//! #[derive(Default)]
//! pub struct CreatePosts;
//!
//! impl Migration for CreatePosts {
//!     fn up(&self, schema: &mut Schema) {
//!         schema.create("posts", |table| {
//!             table.id("id");
//!             table.integer("user_id");
//!             table.foreign_key("user_id", "users", "id");
//!         });
//!     }
//!
//!     fn down(&self, schema: &mut Schema) {
//!         schema.drop("posts", DropKind::Table);
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use trellis_core::DEFAULT_CONNECTION;

use crate::adapter::{DatabaseAdapter, DatabaseValue};
use crate::descriptor::MigrationDescriptor;
use crate::error::{MigrationError, MigrationResult};
use crate::schema_builder::{Blueprint, DropKind, SchemaBuilder, Statement};

/// A versioned schema change
#[async_trait]
pub trait Migration: Send + Sync {
    /// Name of the connection this migration runs against
    fn connection(&self) -> &str {
        DEFAULT_CONNECTION
    }

    /// Declare the forward schema changes
    fn up(&self, schema: &mut Schema);

    /// Declare the changes that undo `up()`
    fn down(&self, schema: &mut Schema);

    /// Insert initial data. Runs only right after this migration was newly
    /// applied, never on revert.
    async fn seed(&self, _seeder: &Seeder) -> MigrationResult<()> {
        Ok(())
    }
}

/// Statement accumulator handed to `up()` and `down()`
#[derive(Debug, Default)]
pub struct Schema {
    queries: Vec<Statement>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table
    pub fn create<F>(&mut self, table: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut Blueprint),
    {
        self.push(SchemaBuilder::create(table, callback))
    }

    /// Alter an existing table. Column renames are emitted as separate
    /// statements; an empty callback adds nothing.
    pub fn alter<F>(&mut self, table: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut Blueprint),
    {
        self.queries.extend(SchemaBuilder::alter(table, callback));
        self
    }

    /// Create or replace a view over `query`
    pub fn create_view(&mut self, name: &str, query: &str) -> &mut Self {
        self.push(SchemaBuilder::create_view(name, query))
    }

    pub fn drop_view(&mut self, name: &str) -> &mut Self {
        self.push(SchemaBuilder::drop(name, DropKind::View))
    }

    /// Drop a table, view or index
    pub fn drop(&mut self, name: &str, kind: DropKind) -> &mut Self {
        self.push(SchemaBuilder::drop(name, kind))
    }

    pub fn create_index(&mut self, table: &str, columns: &[&str], name: Option<&str>) -> &mut Self {
        self.push(SchemaBuilder::create_index(table, columns, name))
    }

    /// Append a hand-written statement
    pub fn raw(&mut self, sql: &str) -> &mut Self {
        self.push(Statement::new(sql))
    }

    pub fn queries(&self) -> &[Statement] {
        &self.queries
    }

    pub fn into_queries(self) -> Vec<Statement> {
        self.queries
    }

    fn push(&mut self, statement: Statement) -> &mut Self {
        self.queries.push(statement);
        self
    }
}

/// Immediate data access for `seed()`
pub struct Seeder {
    connection: String,
    adapter: Arc<dyn DatabaseAdapter>,
}

impl Seeder {
    pub fn new(connection: impl Into<String>, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            connection: connection.into(),
            adapter,
        }
    }

    /// Connection the seeder writes to
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Insert one row right away.
    ///
    /// Null values are written as a literal `NULL` so they fit a column of any
    /// type; everything else is bound as a `$n` parameter.
    pub async fn insert(&self, table: &str, row: &[(&str, DatabaseValue)]) -> MigrationResult<u64> {
        if row.is_empty() {
            return Err(MigrationError::Query {
                message: format!("cannot insert an empty row into {}", table),
            });
        }

        let columns: Vec<&str> = row.iter().map(|(column, _)| *column).collect();
        let mut placeholders = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());
        for (_, value) in row {
            if value.is_null() {
                placeholders.push("NULL".to_string());
            } else {
                params.push(value.clone());
                placeholders.push(format!("${}", params.len()));
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );

        self.adapter.execute_with(&sql, &params).await
    }

    /// Execute an arbitrary statement right away
    pub async fn execute(&self, sql: &str) -> MigrationResult<u64> {
        self.adapter.execute(sql).await
    }
}

/// A migration loaded for one run: its definition file, its declared
/// statements, and its ledger row id when it was loaded for revert
pub struct LoadedMigration {
    descriptor: MigrationDescriptor,
    id: Option<i64>,
    queries: Vec<Statement>,
    definition: Box<dyn Migration>,
}

impl LoadedMigration {
    pub fn new(descriptor: MigrationDescriptor, definition: Box<dyn Migration>) -> Self {
        Self {
            descriptor,
            id: None,
            queries: Vec::new(),
            definition,
        }
    }

    /// Attach the ledger row this migration was reconstructed from
    pub fn with_ledger_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn descriptor(&self) -> &MigrationDescriptor {
        &self.descriptor
    }

    pub fn file_name(&self) -> &str {
        &self.descriptor.file_name
    }

    pub fn timestamp_key(&self) -> &str {
        &self.descriptor.timestamp_key
    }

    pub fn connection(&self) -> &str {
        self.definition.connection()
    }

    /// Ledger row id, set only for migrations loaded from the ledger
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Statements collected by the last `prepare_*` call
    pub fn queries(&self) -> &[Statement] {
        &self.queries
    }

    /// Collect the statements declared by `up()`
    pub fn prepare_up(&mut self) -> &[Statement] {
        let mut schema = Schema::new();
        self.definition.up(&mut schema);
        self.queries = schema.into_queries();
        &self.queries
    }

    /// Collect the statements declared by `down()`
    pub fn prepare_down(&mut self) -> &[Statement] {
        let mut schema = Schema::new();
        self.definition.down(&mut schema);
        self.queries = schema.into_queries();
        &self.queries
    }

    pub(crate) fn definition(&self) -> &dyn Migration {
        self.definition.as_ref()
    }
}

impl std::fmt::Debug for LoadedMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedMigration")
            .field("file_name", &self.descriptor.file_name)
            .field("connection", &self.connection())
            .field("id", &self.id)
            .field("queries", &self.queries.len())
            .finish()
    }
}
