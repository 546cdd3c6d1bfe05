mod common;

use common::*;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::MigrationSettings;
use trellis_migrations::{
    DatabaseValue, Ledger, LedgerRecord, MemoryLedger, MigrationError, MigrationPaths,
    MigrationRegistry, MigrationResult, MigrationRunner, OutcomeStatus,
};

#[tokio::test]
async fn test_run_applies_users_then_posts_in_one_group() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(POSTS, "CreatePosts");

    let report = fixture.runner().run_report().await.unwrap();

    assert!(report.success);
    assert_eq!(
        report.files_with(OutcomeStatus::Applied),
        vec![file(USERS, "CreateUsers"), file(POSTS, "CreatePosts")]
    );
    assert!(fixture.db().has_table("users"));
    assert!(fixture.db().has_table("posts"));

    let records = fixture.ledger.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].group_id, records[1].group_id);
    assert_eq!(report.group_id.as_deref(), Some(records[0].group_id.as_str()));
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(POSTS, "CreatePosts");
    let runner = fixture.runner();

    assert!(runner.run().await.unwrap());
    let executed = fixture.db().executed().len();

    let report = runner.run_report().await.unwrap();
    assert!(report.success);
    assert!(report.outcomes.is_empty());
    assert_eq!(report.group_id, None);
    assert_eq!(fixture.ledger.records().len(), 2);
    assert_eq!(fixture.db().executed().len(), executed);
}

#[tokio::test]
async fn test_run_with_nothing_discovered_succeeds() {
    let fixture = Fixture::new();
    assert!(fixture.runner().run().await.unwrap());
    assert!(fixture.ledger.records().is_empty());
}

#[tokio::test]
async fn test_order_follows_timestamps_across_roots() {
    let fixture = Fixture::new();
    let base = fixture.dir.path();

    // Latest migration in the framework root, earliest in a module.
    touch(&base.join("framework/migrations"), &file(COMMENTS, "CreateComments"));
    touch(&base.join("common/migrations"), &file(POSTS, "CreatePosts"));
    touch(&base.join("modules/Accounts/Migrations"), &file(USERS, "CreateUsers"));

    let settings = MigrationSettings {
        framework_dir: base.join("framework/migrations"),
        common_dir: base.join("common/migrations"),
        modules_dir: base.join("modules"),
        ..MigrationSettings::default()
    };
    let runner = MigrationRunner::new(
        MigrationPaths::scan(&settings).unwrap(),
        registry(),
        fixture.ledger.clone(),
        fixture.connector.clone(),
    );

    assert!(runner.run().await.unwrap());
    assert_eq!(
        fixture.recorded(),
        vec![
            file(USERS, "CreateUsers"),
            file(POSTS, "CreatePosts"),
            file(COMMENTS, "CreateComments"),
        ]
    );

    let executed = fixture.db().executed();
    assert!(executed[0].starts_with("CREATE TABLE users"));
    assert!(executed[1].starts_with("CREATE TABLE posts"));
    assert!(executed[2].starts_with("CREATE TABLE comments"));
}

#[tokio::test]
async fn test_later_run_gets_a_new_greater_group() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(POSTS, "CreatePosts");
    let runner = fixture.runner();
    assert!(runner.run().await.unwrap());

    fixture.add(COMMENTS, "CreateComments");
    let report = runner.run_report().await.unwrap();
    assert_eq!(report.files_with(OutcomeStatus::Applied), vec![file(COMMENTS, "CreateComments")]);

    let records = fixture.ledger.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].group_id, records[1].group_id);
    assert_ne!(records[1].group_id, records[2].group_id);
    assert!(records[2].group_id > records[1].group_id);
}

#[tokio::test]
async fn test_failed_migration_does_not_stop_the_run() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(AUDIT, "AddAuditTrail");
    fixture.add(COMMENTS, "CreateComments");
    fixture.db().fail_on(BROKEN_MARKER);

    let report = fixture.runner().run_report().await.unwrap();

    assert!(!report.success);
    let failed = &report.outcomes[1];
    assert_eq!(failed.file_name, file(AUDIT, "AddAuditTrail"));
    assert_eq!(failed.status, OutcomeStatus::Failed);
    assert_eq!(failed.statements_executed, 1);
    assert!(failed.error.as_deref().unwrap_or_default().contains("Statement #1"));

    // The statement before the failure stays applied; the one after never ran.
    assert!(fixture.db().has_table("audit_trail"));
    assert!(!fixture
        .db()
        .executed()
        .iter()
        .any(|sql| sql.starts_with("CREATE INDEX")));

    let records = fixture.ledger.records();
    assert_eq!(
        records.iter().map(|r| r.migration.clone()).collect::<Vec<_>>(),
        vec![file(USERS, "CreateUsers"), file(COMMENTS, "CreateComments")]
    );
    assert_eq!(records[0].group_id, records[1].group_id);
    assert_eq!(report.group_id.as_deref(), Some(records[0].group_id.as_str()));
}

#[tokio::test]
async fn test_failed_migration_is_retried_on_next_run() {
    let fixture = Fixture::new();
    fixture.add(AUDIT, "AddAuditTrail");
    let runner = fixture.runner().transactional(true);

    fixture.db().fail_on(BROKEN_MARKER);
    assert!(!runner.run().await.unwrap());
    assert!(fixture.recorded().is_empty());

    fixture.db().clear_failures();
    assert!(runner.run().await.unwrap());
    assert_eq!(fixture.recorded(), vec![file(AUDIT, "AddAuditTrail")]);
}

#[tokio::test]
async fn test_transactional_run_rolls_back_partial_migration() {
    let fixture = Fixture::new();
    fixture.add(AUDIT, "AddAuditTrail");
    fixture.add(COMMENTS, "CreateComments");
    fixture.db().fail_on(BROKEN_MARKER);

    let report = fixture.runner().transactional(true).run_report().await.unwrap();

    assert!(!report.success);
    let audit = &report.outcomes[0];
    assert_eq!(audit.file_name, file(AUDIT, "AddAuditTrail"));
    assert_eq!(audit.status, OutcomeStatus::Failed);
    assert_eq!(audit.statements_executed, 0);
    assert!(!fixture.db().has_table("audit_trail"));
    assert!(fixture.db().has_table("comments"));
    assert_eq!(fixture.recorded(), vec![file(COMMENTS, "CreateComments")]);
}

#[tokio::test]
async fn test_seed_runs_once_after_apply() {
    let fixture = Fixture::new();
    fixture.add(ROLES, "SeedRoles");
    let runner = fixture.runner();

    assert!(runner.run().await.unwrap());
    assert_eq!(
        fixture.db().rows("roles"),
        vec![vec![DatabaseValue::from("admin")]]
    );

    fixture.add(COMMENTS, "CreateComments");
    assert!(runner.run().await.unwrap());
    assert_eq!(fixture.db().rows("roles").len(), 1);
}

#[tokio::test]
async fn test_seed_failure_does_not_fail_the_migration() {
    let fixture = Fixture::new();
    fixture.add(GHOSTS, "SeedGhosts");

    assert!(fixture.runner().run().await.unwrap());
    assert!(fixture.db().has_table("ghosts"));
    assert_eq!(fixture.recorded(), vec![file(GHOSTS, "SeedGhosts")]);
}

#[tokio::test]
async fn test_migrations_use_their_own_connection() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(LEADS, "CreateLeads");

    assert!(fixture.runner().run().await.unwrap());

    let crm = fixture.connector.database("crm");
    assert!(crm.has_table("leads"));
    assert!(crm.has_view("open_leads"));
    assert!(!fixture.db().has_table("leads"));
    assert!(fixture.db().has_table("users"));
}

#[tokio::test]
async fn test_unavailable_connection_fails_only_that_migration() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(LEADS, "CreateLeads");
    fixture.connector.make_unavailable("crm");

    let report = fixture.runner().run_report().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.files_with(OutcomeStatus::Failed), vec![file(LEADS, "CreateLeads")]);
    assert_eq!(fixture.recorded(), vec![file(USERS, "CreateUsers")]);
}

#[tokio::test]
async fn test_unregistered_file_aborts_before_executing() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(POSTS, "CreateArticles");

    let result = fixture.runner().run().await;

    match result {
        Err(MigrationError::ClassLoad { class_name, .. }) => assert_eq!(class_name, "CreateArticles"),
        other => panic!("expected ClassLoad, got {:?}", other),
    }
    assert!(fixture.db().executed().is_empty());
    assert!(fixture.recorded().is_empty());
}

#[tokio::test]
async fn test_duplicate_file_names_across_roots_are_rejected() {
    let fixture = Fixture::new();
    let base = fixture.dir.path();
    touch(&base.join("a"), &file(USERS, "CreateUsers"));
    touch(&base.join("b"), &file(USERS, "CreateUsers"));

    let runner = MigrationRunner::new(
        MigrationPaths::from_roots(vec![base.join("a"), base.join("b")], "rs"),
        registry(),
        fixture.ledger.clone(),
        fixture.connector.clone(),
    );

    assert!(matches!(
        runner.run().await,
        Err(MigrationError::DuplicateMigration { .. })
    ));
}

/// Ledger that accepts reads but rejects writes
struct ReadOnlyLedger(MemoryLedger);

#[async_trait]
impl Ledger for ReadOnlyLedger {
    async fn all(&self) -> MigrationResult<Vec<LedgerRecord>> {
        self.0.all().await
    }

    async fn add(&self, migration: &str, _group_id: &str) -> MigrationResult<LedgerRecord> {
        Err(MigrationError::Ledger {
            message: format!("read-only ledger refused {}", migration),
        })
    }

    async fn delete(&self, id: i64) -> MigrationResult<bool> {
        self.0.delete(id).await
    }
}

#[tokio::test]
async fn test_ledger_write_failure_counts_as_migration_failure() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");

    let runner = MigrationRunner::new(
        MigrationPaths::from_roots(vec![fixture.root()], "rs"),
        MigrationRegistry::new().with::<CreateUsers>(USERS),
        Arc::new(ReadOnlyLedger(MemoryLedger::new())),
        fixture.connector.clone(),
    );

    let report = runner.run_report().await.unwrap();
    assert!(!report.success);
    assert_eq!(report.outcomes[0].statements_executed, 1);
    assert!(fixture.db().has_table("users"));
}

#[tokio::test]
async fn test_files_without_separator_are_ignored() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    touch(&fixture.root(), "mod.rs");
    touch(&fixture.root(), "README.md");

    let pending = fixture.runner().new_migrations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].descriptor().directory,
        std::fs::canonicalize(fixture.root()).unwrap_or_else(|_| PathBuf::new())
    );
}
