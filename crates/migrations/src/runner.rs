//! Migration Runner - Applies pending migrations
//!
//! A run loads every discovered file the ledger does not know yet, sorts them
//! by timestamp key and applies them one at a time. Each migration stops at its
//! first failing statement; the run itself always moves on to the next
//! migration and only reports the failure through its aggregate result.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::adapter::{DatabaseAdapter, DatabaseConnector};
use crate::definitions::{
    MigrationDirection, MigrationOutcome, MigrationState, MigrationStatusEntry, RunReport,
};
use crate::descriptor::MigrationDescriptor;
use crate::discovery::MigrationPaths;
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{next_group_id, Ledger, LedgerRecord};
use crate::migration::{LoadedMigration, Seeder};
use crate::registry::MigrationRegistry;
use crate::schema_builder::Statement;

/// Applies and reverts migrations
pub struct MigrationRunner {
    paths: MigrationPaths,
    registry: MigrationRegistry,
    ledger: Arc<dyn Ledger>,
    connector: Arc<dyn DatabaseConnector>,
    transactional: bool,
}

impl MigrationRunner {
    pub fn new(
        paths: MigrationPaths,
        registry: MigrationRegistry,
        ledger: Arc<dyn Ledger>,
        connector: Arc<dyn DatabaseConnector>,
    ) -> Self {
        Self {
            paths,
            registry,
            ledger,
            connector,
            transactional: false,
        }
    }

    /// Wrap each migration's statements in a transaction when the target
    /// connection supports one
    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    pub fn paths(&self) -> &MigrationPaths {
        &self.paths
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    /// Discovered migrations missing from the ledger, in timestamp order.
    ///
    /// Fails with `ClassLoad` if any pending file has no registered definition.
    pub async fn new_migrations(&self) -> MigrationResult<Vec<LoadedMigration>> {
        let applied: HashSet<String> = self
            .ledger
            .all()
            .await?
            .into_iter()
            .map(|record| record.migration)
            .collect();

        let pending: BTreeMap<(String, String), MigrationDescriptor> = self
            .paths
            .migration_files()?
            .into_values()
            .filter(|descriptor| !applied.contains(&descriptor.file_name))
            .map(|descriptor| {
                (
                    (descriptor.timestamp_key.clone(), descriptor.file_name.clone()),
                    descriptor,
                )
            })
            .collect();

        pending
            .values()
            .map(|descriptor| self.registry.load(descriptor))
            .collect()
    }

    /// Apply every pending migration. `Ok(true)` when nothing failed,
    /// including when there was nothing to do.
    pub async fn run(&self) -> MigrationResult<bool> {
        Ok(self.run_report().await?.success)
    }

    /// [`run`](Self::run) with per-migration detail
    pub async fn run_report(&self) -> MigrationResult<RunReport> {
        let start_time = Instant::now();
        let mut report = RunReport::new(MigrationDirection::Up);

        self.ledger.prepare().await?;
        let migrations = self.new_migrations().await?;

        if migrations.is_empty() {
            tracing::info!("Nothing to migrate");
            report.execution_time_ms = elapsed_ms(start_time);
            return Ok(report);
        }

        let latest = self.ledger.latest_group().await?;
        let group_id = next_group_id(Utc::now(), latest.as_deref());
        tracing::info!(
            "Applying {} migration(s) in group {}",
            migrations.len(),
            group_id
        );

        for mut migration in migrations {
            let outcome = self.apply_migration(&mut migration, &group_id).await;
            report.record(outcome);
        }

        report.group_id = Some(group_id);
        report.execution_time_ms = elapsed_ms(start_time);
        Ok(report)
    }

    /// Apply a single migration and record it in `group_id`
    async fn apply_migration(&self, migration: &mut LoadedMigration, group_id: &str) -> MigrationOutcome {
        let file_name = migration.file_name().to_string();
        let statements = migration.prepare_up().to_vec();

        let adapter = match self.connect(migration).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!("Migration {} failed: {}", file_name, e);
                return MigrationOutcome::failed(&file_name, 0, e);
            }
        };

        if let Err(e) = self.execute_statements(&file_name, adapter.as_ref(), &statements).await {
            tracing::warn!("Migration {} failed: {}", file_name, e);
            return MigrationOutcome::failed(&file_name, e.statements_completed(), e);
        }

        let seeder = Seeder::new(migration.connection(), adapter);
        if let Err(e) = migration.definition().seed(&seeder).await {
            tracing::warn!("Seeding {} failed: {}", file_name, e);
        }

        if let Err(e) = self.ledger.add(&file_name, group_id).await {
            tracing::warn!("Migration {} ran but could not be recorded: {}", file_name, e);
            return MigrationOutcome::failed(&file_name, statements.len(), e);
        }

        tracing::info!("Migrated {}", file_name);
        MigrationOutcome::succeeded(&file_name, MigrationDirection::Up, statements.len())
    }

    pub(crate) async fn connect(&self, migration: &LoadedMigration) -> MigrationResult<Arc<dyn DatabaseAdapter>> {
        self.connector.connect(migration.connection()).await
    }

    /// Execute statements in order, stopping at the first failure.
    ///
    /// Returns the number of statements executed. Without a transaction the
    /// statements that ran before a failure stay applied; with one, the
    /// error reports that nothing persisted.
    pub(crate) async fn execute_statements(
        &self,
        file_name: &str,
        adapter: &dyn DatabaseAdapter,
        statements: &[Statement],
    ) -> MigrationResult<usize> {
        if self.transactional {
            if let Some(mut transaction) = adapter.begin().await? {
                for (index, statement) in statements.iter().enumerate() {
                    tracing::debug!("{} [{}]: {}", file_name, index, statement);
                    if let Err(e) = transaction.execute(statement.as_str()).await {
                        if let Err(rollback_error) = transaction.rollback().await {
                            tracing::error!(
                                "Failed to roll back {}: {}",
                                file_name,
                                rollback_error
                            );
                        }
                        return Err(statement_failure(file_name, index, statement, e, true));
                    }
                }

                transaction.commit().await?;
                return Ok(statements.len());
            }

            tracing::debug!(
                "Connection for {} has no transaction support; executing without one",
                file_name
            );
        }

        for (index, statement) in statements.iter().enumerate() {
            tracing::debug!("{} [{}]: {}", file_name, index, statement);
            adapter
                .execute(statement.as_str())
                .await
                .map_err(|e| statement_failure(file_name, index, statement, e, false))?;
        }

        Ok(statements.len())
    }

    /// Every discovered migration with its ledger state, in timestamp order,
    /// followed by ledger rows whose file is gone
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatusEntry>> {
        self.ledger.prepare().await?;

        let mut recorded: HashMap<String, LedgerRecord> = self
            .ledger
            .all()
            .await?
            .into_iter()
            .map(|record| (record.migration.clone(), record))
            .collect();

        let mut descriptors: Vec<MigrationDescriptor> =
            self.paths.migration_files()?.into_values().collect();
        descriptors.sort_by(|a, b| {
            (&a.timestamp_key, &a.file_name).cmp(&(&b.timestamp_key, &b.file_name))
        });

        let mut entries: Vec<MigrationStatusEntry> = descriptors
            .iter()
            .map(|descriptor| {
                let state = match recorded.remove(&descriptor.file_name) {
                    Some(record) => MigrationState::Applied {
                        group_id: record.group_id,
                        applied_at: record.created_at,
                    },
                    None => MigrationState::Pending,
                };
                MigrationStatusEntry::discovered(descriptor, state, self.registry.contains(descriptor))
            })
            .collect();

        let mut missing: Vec<LedgerRecord> = recorded.into_values().collect();
        missing.sort_by_key(|record| record.id);

        for record in missing {
            let parsed = MigrationDescriptor::parse(&record.migration, "", self.paths.extension()).ok();
            entries.push(MigrationStatusEntry {
                timestamp_key: parsed.as_ref().map(|d| d.timestamp_key.clone()),
                registered: parsed.as_ref().map_or(false, |d| self.registry.contains(d)),
                file_name: record.migration,
                state: MigrationState::Missing {
                    group_id: record.group_id,
                    applied_at: record.created_at,
                },
            });
        }

        Ok(entries)
    }
}

fn statement_failure(
    file_name: &str,
    index: usize,
    statement: &Statement,
    error: MigrationError,
    rolled_back: bool,
) -> MigrationError {
    MigrationError::QueryExecution {
        file_name: file_name.to_string(),
        index,
        statement: statement.to_string(),
        message: error.to_string(),
        rolled_back,
    }
}

pub(crate) fn elapsed_ms(start_time: Instant) -> u64 {
    u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
}
