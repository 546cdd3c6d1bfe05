mod common;

use common::*;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_migrations::{
    Ledger, LedgerRecord, MemoryLedger, MigrationError, MigrationPaths, MigrationResult,
    MigrationRunner, MigrationState, OutcomeStatus,
};

#[tokio::test]
async fn test_revert_with_empty_ledger_returns_false() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");

    let report = fixture.runner().revert_report().await.unwrap();

    assert!(!report.success);
    assert!(report.outcomes.is_empty());
    assert!(fixture.db().executed().is_empty());
}

#[tokio::test]
async fn test_run_then_revert_round_trip() {
    let fixture = Fixture::new();
    fixture.add(COMMENTS, "CreateComments");
    let runner = fixture.runner();

    assert!(runner.run().await.unwrap());
    assert!(fixture.db().has_table("comments"));

    assert!(runner.revert().await.unwrap());
    assert!(!fixture.db().has_table("comments"));
    assert!(fixture.recorded().is_empty());
}

#[tokio::test]
async fn test_revert_drops_posts_before_users() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(POSTS, "CreatePosts");
    let runner = fixture.runner();
    assert!(runner.run().await.unwrap());

    let order: Vec<String> = runner
        .last_migrations()
        .await
        .unwrap()
        .iter()
        .map(|m| m.file_name().to_string())
        .collect();
    assert_eq!(order, vec![file(POSTS, "CreatePosts"), file(USERS, "CreateUsers")]);

    let report = runner.revert_report().await.unwrap();
    assert!(report.success);
    assert_eq!(
        report.files_with(OutcomeStatus::Reverted),
        vec![file(POSTS, "CreatePosts"), file(USERS, "CreateUsers")]
    );

    let executed = fixture.db().executed();
    let drops: Vec<&String> = executed.iter().filter(|sql| sql.starts_with("DROP")).collect();
    assert_eq!(
        drops,
        vec!["DROP TABLE IF EXISTS posts;", "DROP TABLE IF EXISTS users;"]
    );

    assert!(fixture.db().tables().is_empty());
    assert!(fixture.recorded().is_empty());
}

#[tokio::test]
async fn test_revert_only_touches_last_batch() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    let runner = fixture.runner();
    assert!(runner.run().await.unwrap());

    fixture.add(POSTS, "CreatePosts");
    fixture.add(COMMENTS, "CreateComments");
    assert!(runner.run().await.unwrap());

    assert!(runner.revert().await.unwrap());
    assert_eq!(fixture.recorded(), vec![file(USERS, "CreateUsers")]);
    assert!(fixture.db().has_table("users"));
    assert!(!fixture.db().has_table("posts"));

    assert!(runner.revert().await.unwrap());
    assert!(fixture.recorded().is_empty());
    assert!(!runner.revert().await.unwrap());
}

#[tokio::test]
async fn test_revert_does_not_seed() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(ROLES, "SeedRoles");
    let runner = fixture.runner();

    assert!(runner.run().await.unwrap());
    let inserts_after_run = count_inserts(&fixture);
    assert_eq!(inserts_after_run, 1);

    assert!(runner.revert().await.unwrap());
    assert_eq!(count_inserts(&fixture), inserts_after_run);
}

fn count_inserts(fixture: &Fixture) -> usize {
    fixture
        .db()
        .executed()
        .iter()
        .filter(|sql| sql.starts_with("INSERT"))
        .count()
}

#[tokio::test]
async fn test_missing_file_is_skipped() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    let comments = fixture.add(COMMENTS, "CreateComments");
    let runner = fixture.runner();
    assert!(runner.run().await.unwrap());

    fs::remove_file(comments).unwrap();

    let report = runner.revert_report().await.unwrap();

    assert!(report.success);
    assert_eq!(report.files_with(OutcomeStatus::Skipped), vec![file(COMMENTS, "CreateComments")]);
    assert_eq!(report.files_with(OutcomeStatus::Reverted), vec![file(USERS, "CreateUsers")]);

    // The orphaned row stays; it can never be reverted.
    assert_eq!(fixture.recorded(), vec![file(COMMENTS, "CreateComments")]);
    assert!(fixture.db().has_table("comments"));

    let status = runner.status().await.unwrap();
    assert_eq!(status.len(), 2);
    assert!(status[0].is_pending());
    assert_eq!(status[1].file_name, file(COMMENTS, "CreateComments"));
    assert!(matches!(status[1].state, MigrationState::Missing { .. }));

    assert!(!runner.revert().await.unwrap());
}

#[tokio::test]
async fn test_failed_revert_keeps_ledger_row_and_continues() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    fixture.add(COMMENTS, "CreateComments");
    let runner = fixture.runner();
    assert!(runner.run().await.unwrap());

    fixture.db().fail_on("DROP TABLE IF EXISTS comments");

    let report = runner.revert_report().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.files_with(OutcomeStatus::Failed), vec![file(COMMENTS, "CreateComments")]);
    assert_eq!(report.files_with(OutcomeStatus::Reverted), vec![file(USERS, "CreateUsers")]);
    assert_eq!(fixture.recorded(), vec![file(COMMENTS, "CreateComments")]);
}

#[tokio::test]
async fn test_revert_reports_the_reverted_group() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    let runner = fixture.runner();

    let applied = runner.run_report().await.unwrap();
    let reverted = runner.revert_report().await.unwrap();

    assert!(applied.group_id.is_some());
    assert_eq!(applied.group_id, reverted.group_id);
    assert!(fixture.ledger.latest_group().await.unwrap().is_none());
}

#[tokio::test]
async fn test_revert_fails_fast_on_unregistered_file() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    assert!(fixture.runner().run().await.unwrap());

    let runner = fixture.runner_with(trellis_migrations::MigrationRegistry::new());

    assert!(matches!(
        runner.revert().await,
        Err(MigrationError::ClassLoad { .. })
    ));
    assert_eq!(fixture.recorded(), vec![file(USERS, "CreateUsers")]);
}

/// Ledger that records normally but answers deletes with a fixed result
struct StuckLedger {
    inner: Arc<MemoryLedger>,
    refuse: bool,
}

#[async_trait]
impl Ledger for StuckLedger {
    async fn all(&self) -> MigrationResult<Vec<LedgerRecord>> {
        self.inner.all().await
    }

    async fn add(&self, migration: &str, group_id: &str) -> MigrationResult<LedgerRecord> {
        self.inner.add(migration, group_id).await
    }

    async fn delete(&self, id: i64) -> MigrationResult<bool> {
        if self.refuse {
            return Err(MigrationError::Ledger {
                message: format!("cannot delete row {}", id),
            });
        }
        Ok(false)
    }
}

fn stuck_runner(fixture: &Fixture, refuse: bool) -> MigrationRunner {
    MigrationRunner::new(
        MigrationPaths::from_roots(vec![fixture.root()], "rs"),
        registry(),
        Arc::new(StuckLedger {
            inner: fixture.ledger.clone(),
            refuse,
        }),
        fixture.connector.clone(),
    )
}

#[tokio::test]
async fn test_ledger_delete_failure_counts_as_revert_failure() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    assert!(fixture.runner().run().await.unwrap());

    let report = stuck_runner(&fixture, true).revert_report().await.unwrap();

    assert!(!report.success);
    assert_eq!(report.files_with(OutcomeStatus::Failed), vec![file(USERS, "CreateUsers")]);
    assert_eq!(report.outcomes[0].statements_executed, 1);
    assert!(report.outcomes[0]
        .error
        .as_deref()
        .is_some_and(|error| error.contains("cannot delete row")));
    assert!(!fixture.db().has_table("users"));
    assert_eq!(fixture.recorded(), vec![file(USERS, "CreateUsers")]);
}

#[tokio::test]
async fn test_ledger_row_already_gone_still_counts_as_reverted() {
    let fixture = Fixture::new();
    fixture.add(USERS, "CreateUsers");
    assert!(fixture.runner().run().await.unwrap());

    let report = stuck_runner(&fixture, false).revert_report().await.unwrap();

    assert!(report.success);
    assert_eq!(report.files_with(OutcomeStatus::Reverted), vec![file(USERS, "CreateUsers")]);
    assert!(!fixture.db().has_table("users"));
}
