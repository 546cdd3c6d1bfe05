//! Shared fixtures for the engine tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use trellis_migrations::{
    DatabaseValue, DropKind, MemoryConnector, MemoryDatabase, MemoryLedger, Migration,
    MigrationPaths, MigrationRegistry, MigrationResult, MigrationRunner, Schema, Seeder,
};

pub const USERS: &str = "2025-01-01T00.00.00.000000";
pub const POSTS: &str = "2025-01-02T00.00.00.000000";
pub const AUDIT: &str = "2025-01-03T00.00.00.000000";
pub const COMMENTS: &str = "2025-01-04T00.00.00.000000";
pub const ROLES: &str = "2025-01-05T00.00.00.000000";
pub const GHOSTS: &str = "2025-01-06T00.00.00.000000";
pub const LEADS: &str = "2025-01-07T00.00.00.000000";

pub fn file(timestamp_key: &str, class_name: &str) -> String {
    format!("{}_{}.rs", timestamp_key, class_name)
}

#[derive(Default)]
pub struct CreateUsers;

impl Migration for CreateUsers {
    fn up(&self, schema: &mut Schema) {
        schema.create("users", |table| {
            table.id("id");
            table.string("email", Some(255)).not_null();
            table.unique(&["email"]);
        });
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop("users", DropKind::Table);
    }
}

#[derive(Default)]
pub struct CreatePosts;

impl Migration for CreatePosts {
    fn up(&self, schema: &mut Schema) {
        schema.create("posts", |table| {
            table.id("id");
            table.integer("user_id").not_null();
            table.text("body");
            table.foreign_key("user_id", "users", "id");
        });
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop("posts", DropKind::Table);
    }
}

/// Creates a table, then issues a statement the test database rejects
#[derive(Default)]
pub struct AddAuditTrail;

pub const BROKEN_MARKER: &str = "-- rejected";

impl Migration for AddAuditTrail {
    fn up(&self, schema: &mut Schema) {
        schema.create("audit_trail", |table| {
            table.id("id");
            table.json("payload");
        });
        schema.raw(&format!("UPDATE audit_trail SET payload = NULL {}", BROKEN_MARKER));
        schema.create_index("audit_trail", &["payload"], None);
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop("audit_trail", DropKind::Table);
    }
}

#[derive(Default)]
pub struct CreateComments;

impl Migration for CreateComments {
    fn up(&self, schema: &mut Schema) {
        schema.create("comments", |table| {
            table.id("id");
            table.timestamps();
        });
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop("comments", DropKind::Table);
    }
}

#[derive(Default)]
pub struct SeedRoles;

#[async_trait::async_trait]
impl Migration for SeedRoles {
    fn up(&self, schema: &mut Schema) {
        schema.create("roles", |table| {
            table.id("id");
            table.string("name", Some(32));
        });
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop("roles", DropKind::Table);
    }

    async fn seed(&self, seeder: &Seeder) -> MigrationResult<()> {
        seeder
            .insert("roles", &[("name", DatabaseValue::from("admin"))])
            .await?;
        Ok(())
    }
}

/// Seeds into a table that does not exist
#[derive(Default)]
pub struct SeedGhosts;

#[async_trait::async_trait]
impl Migration for SeedGhosts {
    fn up(&self, schema: &mut Schema) {
        schema.create("ghosts", |table| {
            table.id("id");
        });
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop("ghosts", DropKind::Table);
    }

    async fn seed(&self, seeder: &Seeder) -> MigrationResult<()> {
        seeder
            .insert("haunted_rooms", &[("ghost_id", DatabaseValue::from(1))])
            .await?;
        Ok(())
    }
}

/// Lives on a second connection
#[derive(Default)]
pub struct CreateLeads;

impl Migration for CreateLeads {
    fn connection(&self) -> &str {
        "crm"
    }

    fn up(&self, schema: &mut Schema) {
        schema.create("leads", |table| {
            table.id("id");
        });
        schema.create_view("open_leads", "SELECT id FROM leads");
    }

    fn down(&self, schema: &mut Schema) {
        schema.drop_view("open_leads");
        schema.drop("leads", DropKind::Table);
    }
}

/// Registry knowing every fixture migration
pub fn registry() -> MigrationRegistry {
    MigrationRegistry::new()
        .with::<CreateUsers>(USERS)
        .with::<CreatePosts>(POSTS)
        .with::<AddAuditTrail>(AUDIT)
        .with::<CreateComments>(COMMENTS)
        .with::<SeedRoles>(ROLES)
        .with::<SeedGhosts>(GHOSTS)
        .with::<CreateLeads>(LEADS)
}

/// A migrations directory plus in-memory databases and ledger
pub struct Fixture {
    pub dir: TempDir,
    pub connector: Arc<MemoryConnector>,
    pub ledger: Arc<MemoryLedger>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            connector: Arc::new(MemoryConnector::new()),
            ledger: Arc::new(MemoryLedger::new()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    /// Place a migration file in the single root
    pub fn add(&self, timestamp_key: &str, class_name: &str) -> PathBuf {
        touch(&self.root(), &file(timestamp_key, class_name))
    }

    pub fn runner(&self) -> MigrationRunner {
        self.runner_with(registry())
    }

    pub fn runner_with(&self, registry: MigrationRegistry) -> MigrationRunner {
        MigrationRunner::new(
            MigrationPaths::from_roots(vec![self.root()], "rs"),
            registry,
            self.ledger.clone(),
            self.connector.clone(),
        )
    }

    pub fn db(&self) -> MemoryDatabase {
        self.connector.database("default")
    }

    pub fn recorded(&self) -> Vec<String> {
        self.ledger
            .records()
            .into_iter()
            .map(|record| record.migration)
            .collect()
    }
}

pub fn touch(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, "// migration definition\n").unwrap();
    path
}
