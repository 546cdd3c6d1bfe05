//! Migration Rollback - Reverts the last applied batch
//!
//! The last batch is read from the ledger, each row is matched back to its
//! file, and the migrations are reverted newest first so tables that reference
//! others are dropped before the tables they reference.

use std::time::Instant;

use crate::definitions::{MigrationDirection, MigrationOutcome, RunReport};
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::LedgerRecord;
use crate::migration::LoadedMigration;
use crate::runner::{elapsed_ms, MigrationRunner};

/// The last batch split into revertible migrations and orphaned ledger rows
struct LastBatch {
    group_id: Option<String>,
    /// Newest first
    migrations: Vec<LoadedMigration>,
    missing: Vec<LedgerRecord>,
}

impl MigrationRunner {
    /// Migrations of the last batch in the order they will be reverted.
    ///
    /// Ledger rows whose file can no longer be found are left out.
    pub async fn last_migrations(&self) -> MigrationResult<Vec<LoadedMigration>> {
        Ok(self.resolve_last_batch().await?.migrations)
    }

    async fn resolve_last_batch(&self) -> MigrationResult<LastBatch> {
        let records = self.ledger().last_batch().await?;
        let group_id = records.first().map(|record| record.group_id.clone());

        let mut migrations = Vec::with_capacity(records.len());
        let mut missing = Vec::new();

        for record in records {
            match self.paths().find(&record.migration)? {
                Some(descriptor) => {
                    let migration = self.registry().load(&descriptor)?.with_ledger_id(record.id);
                    migrations.push(migration);
                }
                None => {
                    let error = MigrationError::FileNotFound {
                        file_name: record.migration.clone(),
                    };
                    tracing::warn!("{}; it cannot be reverted", error);
                    missing.push(record);
                }
            }
        }

        migrations.sort_by(|a, b| {
            (a.timestamp_key(), a.file_name()).cmp(&(b.timestamp_key(), b.file_name()))
        });
        migrations.reverse();

        Ok(LastBatch {
            group_id,
            migrations,
            missing,
        })
    }

    /// Revert the last batch. `Ok(false)` when there was nothing to revert or
    /// any migration failed.
    pub async fn revert(&self) -> MigrationResult<bool> {
        Ok(self.revert_report().await?.success)
    }

    /// [`revert`](Self::revert) with per-migration detail
    pub async fn revert_report(&self) -> MigrationResult<RunReport> {
        let start_time = Instant::now();
        let mut report = RunReport::new(MigrationDirection::Down);

        self.ledger().prepare().await?;
        let batch = self.resolve_last_batch().await?;
        report.group_id = batch.group_id;

        for record in &batch.missing {
            report.record(MigrationOutcome::skipped(&record.migration, "migration file not found"));
        }

        if batch.migrations.is_empty() {
            tracing::info!("Nothing to revert");
            report.success = false;
            report.execution_time_ms = elapsed_ms(start_time);
            return Ok(report);
        }

        tracing::info!("Reverting {} migration(s)", batch.migrations.len());

        for mut migration in batch.migrations {
            let outcome = self.revert_migration(&mut migration).await;
            report.record(outcome);
        }

        report.execution_time_ms = elapsed_ms(start_time);
        Ok(report)
    }

    /// Revert a single migration and delete its ledger row
    async fn revert_migration(&self, migration: &mut LoadedMigration) -> MigrationOutcome {
        let file_name = migration.file_name().to_string();
        let statements = migration.prepare_down().to_vec();

        let adapter = match self.connect(migration).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!("Reverting {} failed: {}", file_name, e);
                return MigrationOutcome::failed(&file_name, 0, e);
            }
        };

        if let Err(e) = self.execute_statements(&file_name, adapter.as_ref(), &statements).await {
            tracing::warn!("Reverting {} failed: {}", file_name, e);
            return MigrationOutcome::failed(&file_name, e.statements_completed(), e);
        }

        let deleted = match migration.id() {
            Some(id) => self.ledger().delete(id).await,
            None => Err(MigrationError::Ledger {
                message: format!("{} was not loaded from the ledger", file_name),
            }),
        };

        match deleted {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Ledger row for {} was already gone", file_name),
            Err(e) => {
                tracing::warn!("Reverted {} but could not update the ledger: {}", file_name, e);
                return MigrationOutcome::failed(&file_name, statements.len(), e);
            }
        }

        tracing::info!("Reverted {}", file_name);
        MigrationOutcome::succeeded(&file_name, MigrationDirection::Down, statements.len())
    }
}
