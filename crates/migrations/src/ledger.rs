//! Applied-migration ledger
//!
//! The ledger is an append/delete log of migration file names. A file is
//! applied exactly when its name appears here. Every row written by one run
//! shares that run's group id, and the "last batch" is the set of rows
//! carrying the greatest group id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MigrationResult;

/// `chrono` format of a group id: UTC run start time with microseconds
pub const GROUP_ID_FORMAT: &str = "%Y%m%d%H%M%S%6f";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: i64,
    /// Migration file name
    pub migration: String,
    /// Batch the migration was applied in
    pub group_id: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent store of applied migrations
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create the backing storage if it does not exist yet
    async fn prepare(&self) -> MigrationResult<()> {
        Ok(())
    }

    /// Every record, ordered by id
    async fn all(&self) -> MigrationResult<Vec<LedgerRecord>>;

    /// Record a migration as applied in `group_id`
    async fn add(&self, migration: &str, group_id: &str) -> MigrationResult<LedgerRecord>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, id: i64) -> MigrationResult<bool>;

    /// Records sharing the greatest group id, ordered by id
    async fn last_batch(&self) -> MigrationResult<Vec<LedgerRecord>> {
        let records = self.all().await?;
        Ok(select_last_batch(records))
    }

    /// Greatest group id in the ledger
    async fn latest_group(&self) -> MigrationResult<Option<String>> {
        let records = self.all().await?;
        Ok(records.into_iter().map(|record| record.group_id).max())
    }
}

/// Keep only the records of the greatest group id, ordered by id
pub fn select_last_batch(records: Vec<LedgerRecord>) -> Vec<LedgerRecord> {
    let Some(latest) = records.iter().map(|record| record.group_id.clone()).max() else {
        return Vec::new();
    };

    let mut batch: Vec<_> = records
        .into_iter()
        .filter(|record| record.group_id == latest)
        .collect();
    batch.sort_by_key(|record| record.id);
    batch
}

/// Group id for a run starting at `now`.
///
/// The result always sorts after `latest`. When the clock would not produce a
/// greater value (two runs within the same microsecond, or a clock that went
/// backwards) the previous id plus one is used instead.
pub fn next_group_id(now: DateTime<Utc>, latest: Option<&str>) -> String {
    let candidate = now.format(GROUP_ID_FORMAT).to_string();

    match latest {
        Some(latest) if candidate.as_str() <= latest => {
            match latest.parse::<u128>().ok().and_then(|value| value.checked_add(1)) {
                Some(next) => format!("{:0width$}", next, width = latest.len()),
                None => {
                    tracing::warn!(
                        "Ledger group id '{}' cannot be incremented; new batches may not sort after it",
                        latest
                    );
                    candidate
                }
            }
        }
        _ => candidate,
    }
}
