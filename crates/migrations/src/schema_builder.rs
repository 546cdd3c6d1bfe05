//! Schema Builder - DSL for creating database schema changes
//!
//! Turns a fluent table definition into concrete SQL [`Statement`]s.
//! The generated SQL targets PostgreSQL.

use std::fmt;
use tracing::warn;

/// One SQL statement produced by the schema builder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement(String);

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Statement {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self(sql)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self(sql.to_string())
    }
}

/// Kind of object removed by [`SchemaBuilder::drop`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DropKind {
    #[default]
    Table,
    View,
    Index,
}

impl DropKind {
    fn keyword(self) -> &'static str {
        match self {
            DropKind::Table => "TABLE",
            DropKind::View => "VIEW",
            DropKind::Index => "INDEX",
        }
    }
}

/// Statement factory used by migrations
pub struct SchemaBuilder;

impl SchemaBuilder {
    /// CREATE TABLE from a blueprint callback
    pub fn create<F>(table_name: &str, callback: F) -> Statement
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprint = Blueprint::create(table_name);
        callback(&mut blueprint);
        blueprint.create_statement()
    }

    /// ALTER TABLE from a blueprint callback.
    ///
    /// Column renames cannot share an ALTER TABLE with other actions, so each
    /// becomes its own statement after the combined one. A callback that
    /// declares nothing yields no statements.
    pub fn alter<F>(table_name: &str, callback: F) -> Vec<Statement>
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprint = Blueprint::alter(table_name);
        callback(&mut blueprint);
        blueprint.to_statements()
    }

    /// CREATE OR REPLACE VIEW over a SELECT query
    pub fn create_view(view_name: &str, query: &str) -> Statement {
        let query = query.trim().trim_end_matches(';').trim_end();
        Statement::new(format!("CREATE OR REPLACE VIEW {} AS {};", view_name, query))
    }

    /// DROP ... IF EXISTS
    pub fn drop(name: &str, kind: DropKind) -> Statement {
        Statement::new(format!("DROP {} IF EXISTS {};", kind.keyword(), name))
    }

    /// CREATE INDEX
    pub fn create_index(table_name: &str, column_names: &[&str], index_name: Option<&str>) -> Statement {
        let default_name = format!("idx_{}_{}", table_name, column_names.join("_"));
        let index_name = index_name.unwrap_or(&default_name);
        Statement::new(format!(
            "CREATE INDEX {} ON {} ({});",
            index_name,
            table_name,
            column_names.join(", ")
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlueprintMode {
    Create,
    Alter,
}

/// Table definition collected by a create or alter callback
pub struct Blueprint {
    table_name: String,
    mode: BlueprintMode,
    columns: Vec<String>,
    constraints: Vec<String>,
    alterations: Vec<String>,
    renames: Vec<(String, String)>,
}

impl Blueprint {
    fn create(table_name: &str) -> Self {
        Self::with_mode(table_name, BlueprintMode::Create)
    }

    fn alter(table_name: &str) -> Self {
        Self::with_mode(table_name, BlueprintMode::Alter)
    }

    fn with_mode(table_name: &str, mode: BlueprintMode) -> Self {
        Self {
            table_name: table_name.to_string(),
            mode,
            columns: Vec::new(),
            constraints: Vec::new(),
            alterations: Vec::new(),
            renames: Vec::new(),
        }
    }

    /// Table this blueprint applies to
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Add a column with a raw type definition
    pub fn column(&mut self, name: &str, definition: &str) -> &mut Self {
        self.columns.push(format!("{} {}", name, definition));
        self
    }

    /// Auto-increment primary key
    pub fn id(&mut self, name: &str) -> &mut Self {
        self.column(name, "SERIAL PRIMARY KEY")
    }

    /// 64-bit auto-increment primary key
    pub fn big_id(&mut self, name: &str) -> &mut Self {
        self.column(name, "BIGSERIAL PRIMARY KEY")
    }

    pub fn uuid(&mut self, name: &str) -> &mut Self {
        self.column(name, "UUID DEFAULT gen_random_uuid()")
    }

    /// VARCHAR(n), or TEXT when no length is given
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut Self {
        let column_type = match length {
            Some(len) => format!("VARCHAR({})", len),
            None => "TEXT".to_string(),
        };
        self.column(name, &column_type)
    }

    pub fn text(&mut self, name: &str) -> &mut Self {
        self.column(name, "TEXT")
    }

    pub fn integer(&mut self, name: &str) -> &mut Self {
        self.column(name, "INTEGER")
    }

    pub fn big_integer(&mut self, name: &str) -> &mut Self {
        self.column(name, "BIGINT")
    }

    pub fn boolean(&mut self, name: &str) -> &mut Self {
        self.column(name, "BOOLEAN")
    }

    pub fn decimal(&mut self, name: &str, precision: u8, scale: u8) -> &mut Self {
        self.column(name, &format!("NUMERIC({}, {})", precision, scale))
    }

    pub fn timestamp(&mut self, name: &str) -> &mut Self {
        self.column(name, "TIMESTAMPTZ")
    }

    pub fn json(&mut self, name: &str) -> &mut Self {
        self.column(name, "JSONB")
    }

    /// `created_at` and `updated_at` columns
    pub fn timestamps(&mut self) -> &mut Self {
        self.column("created_at", "TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP");
        self.column("updated_at", "TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP")
    }

    /// Mark the last added column NOT NULL
    pub fn not_null(&mut self) -> &mut Self {
        self.modify_last_column(" NOT NULL")
    }

    /// Give the last added column a default expression
    pub fn default(&mut self, expression: &str) -> &mut Self {
        self.modify_last_column(&format!(" DEFAULT {}", expression))
    }

    /// Add a primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("PRIMARY KEY ({})", columns.join(", ")));
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.constraints.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            column, references_table, references_column
        ));
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(format!("UNIQUE ({})", columns.join(", ")));
        self
    }

    /// Drop a column (alter only)
    pub fn drop_column(&mut self, name: &str) -> &mut Self {
        self.alterations.push(format!("DROP COLUMN {}", name));
        self
    }

    /// Rename a column (alter only)
    pub fn rename_column(&mut self, from: &str, to: &str) -> &mut Self {
        self.renames.push((from.to_string(), to.to_string()));
        self
    }

    /// Drop a named constraint (alter only)
    pub fn drop_constraint(&mut self, name: &str) -> &mut Self {
        self.alterations
            .push(format!("DROP CONSTRAINT IF EXISTS {}", name));
        self
    }

    fn modify_last_column(&mut self, modifier: &str) -> &mut Self {
        if let Some(last) = self.columns.last_mut() {
            last.push_str(modifier);
        }
        self
    }

    /// CREATE TABLE for this blueprint. Alter-only actions are ignored with
    /// a warning.
    fn create_statement(&self) -> Statement {
        if !self.alterations.is_empty() || !self.renames.is_empty() {
            warn!(
                "Ignoring {} alter-only action(s) declared while creating table {}",
                self.alterations.len() + self.renames.len(),
                self.table_name
            );
        }

        let mut parts = self.columns.clone();
        parts.extend(self.constraints.iter().cloned());

        Statement::new(format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.table_name,
            parts.join(",\n    ")
        ))
    }

    /// Build the statements for this blueprint
    pub fn to_statements(&self) -> Vec<Statement> {
        match self.mode {
            BlueprintMode::Create => vec![self.create_statement()],
            BlueprintMode::Alter => {
                let mut actions: Vec<String> = self
                    .columns
                    .iter()
                    .map(|column| format!("ADD COLUMN {}", column))
                    .collect();
                actions.extend(
                    self.constraints
                        .iter()
                        .map(|constraint| format!("ADD {}", constraint)),
                );
                actions.extend(self.alterations.iter().cloned());

                let mut statements = Vec::new();
                if !actions.is_empty() {
                    statements.push(Statement::new(format!(
                        "ALTER TABLE {}\n    {};",
                        self.table_name,
                        actions.join(",\n    ")
                    )));
                }
                statements.extend(self.renames.iter().map(|(from, to)| {
                    Statement::new(format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {};",
                        self.table_name, from, to
                    ))
                }));
                statements
            }
        }
    }
}
