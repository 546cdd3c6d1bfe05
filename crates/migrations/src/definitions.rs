//! Migration Definitions - Result and status types
//!
//! `run()` and `revert()` only answer with a boolean. The types here carry the
//! per-migration detail behind that boolean for tooling and the CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::descriptor::MigrationDescriptor;

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run `up()` statements)
    Up,
    /// Revert the migration (run `down()` statements)
    Down,
}

/// What happened to one migration during a run or revert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Applied,
    Reverted,
    Failed,
    /// Ledger row whose file could not be found
    Skipped,
}

/// Result for a single migration
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub file_name: String,
    pub status: OutcomeStatus,
    /// Statements that completed, including on failure
    pub statements_executed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationOutcome {
    pub(crate) fn succeeded(file_name: &str, direction: MigrationDirection, statements: usize) -> Self {
        Self {
            file_name: file_name.to_string(),
            status: match direction {
                MigrationDirection::Up => OutcomeStatus::Applied,
                MigrationDirection::Down => OutcomeStatus::Reverted,
            },
            statements_executed: statements,
            error: None,
        }
    }

    pub(crate) fn failed(file_name: &str, statements: usize, error: impl ToString) -> Self {
        Self {
            file_name: file_name.to_string(),
            status: OutcomeStatus::Failed,
            statements_executed: statements,
            error: Some(error.to_string()),
        }
    }

    pub(crate) fn skipped(file_name: &str, reason: impl ToString) -> Self {
        Self {
            file_name: file_name.to_string(),
            status: OutcomeStatus::Skipped,
            statements_executed: 0,
            error: Some(reason.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}

/// Aggregate result of one `run()` or `revert()` call
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub direction: MigrationDirection,
    /// `false` as soon as any migration failed
    pub success: bool,
    /// Group id written to the ledger; `None` when nothing was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub outcomes: Vec<MigrationOutcome>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u64,
}

impl RunReport {
    pub(crate) fn new(direction: MigrationDirection) -> Self {
        Self {
            direction,
            success: true,
            group_id: None,
            outcomes: Vec::new(),
            execution_time_ms: 0,
        }
    }

    pub(crate) fn record(&mut self, outcome: MigrationOutcome) {
        if outcome.is_failure() {
            self.success = false;
        }
        self.outcomes.push(outcome);
    }

    /// File names with the given status, in execution order
    pub fn files_with(&self, status: OutcomeStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .map(|outcome| outcome.file_name.as_str())
            .collect()
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Migration state as seen by `status()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationState {
    /// Found on disk, not in the ledger
    Pending,
    /// Found on disk and in the ledger
    Applied {
        group_id: String,
        applied_at: DateTime<Utc>,
    },
    /// In the ledger, but the file is gone; cannot be reverted
    Missing {
        group_id: String,
        applied_at: DateTime<Utc>,
    },
}

/// One line of `status()` output
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_key: Option<String>,
    #[serde(flatten)]
    pub state: MigrationState,
    /// Whether a definition is registered for this file
    pub registered: bool,
}

impl MigrationStatusEntry {
    pub(crate) fn discovered(descriptor: &MigrationDescriptor, state: MigrationState, registered: bool) -> Self {
        Self {
            file_name: descriptor.file_name.clone(),
            timestamp_key: Some(descriptor.timestamp_key.clone()),
            state,
            registered,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == MigrationState::Pending
    }
}
