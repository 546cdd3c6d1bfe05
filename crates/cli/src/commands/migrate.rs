use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trellis_core::{ConfigTrait, TrellisConfig};
use trellis_migrations::{
    MigrationDirection, MigrationPaths, MigrationRegistry, MigrationRunner, MigrationScaffold,
    MigrationState, MigrationStatusEntry, OutcomeStatus, PostgresConnector, PostgresLedger,
    RunReport,
};

/// Runner over the configured PostgreSQL connections and ledger table
pub async fn build_runner(
    config: &TrellisConfig,
    registry: MigrationRegistry,
) -> anyhow::Result<MigrationRunner> {
    config.validate().context("invalid configuration")?;

    let paths = MigrationPaths::scan(&config.migrations)?;
    let connector = Arc::new(PostgresConnector::new(config.database.clone()));
    let pool = connector
        .pool(&config.migrations.connection)
        .await
        .with_context(|| format!("failed to open ledger connection '{}'", config.migrations.connection))?;
    let ledger = Arc::new(PostgresLedger::new(pool, &config.migrations.table));

    Ok(MigrationRunner::new(paths, registry, ledger, connector)
        .transactional(config.migrations.transactional))
}

pub async fn run(runner: &MigrationRunner, json: bool, out: &mut dyn Write) -> anyhow::Result<bool> {
    let report = runner.run_report().await?;
    write_report(&report, json, out)?;
    Ok(report.success)
}

pub async fn revert(runner: &MigrationRunner, json: bool, out: &mut dyn Write) -> anyhow::Result<bool> {
    let report = runner.revert_report().await?;
    write_report(&report, json, out)?;
    Ok(report.success)
}

pub async fn status(runner: &MigrationRunner, json: bool, out: &mut dyn Write) -> anyhow::Result<bool> {
    let entries = runner.status().await?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
    } else {
        write_status(&entries, out)?;
    }

    Ok(true)
}

pub fn make(name: &str, dir: &Path, extension: &str, out: &mut dyn Write) -> anyhow::Result<PathBuf> {
    let path = MigrationScaffold::new(extension).create(name, dir)?;
    writeln!(out, "Created migration: {}", path.display())?;
    Ok(path)
}

fn write_report(report: &RunReport, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
        return Ok(());
    }

    let (verb, done) = match report.direction {
        MigrationDirection::Up => ("migrate", OutcomeStatus::Applied),
        MigrationDirection::Down => ("revert", OutcomeStatus::Reverted),
    };

    if report.outcomes.is_empty() {
        writeln!(out, "Nothing to {}", verb)?;
        return Ok(());
    }

    if let Some(group_id) = &report.group_id {
        writeln!(out, "Group {}", group_id)?;
    }

    for outcome in &report.outcomes {
        match outcome.status {
            OutcomeStatus::Applied | OutcomeStatus::Reverted => writeln!(
                out,
                "  ✅ {} ({} statements)",
                outcome.file_name, outcome.statements_executed
            )?,
            OutcomeStatus::Failed => writeln!(
                out,
                "  ❌ {}: {}",
                outcome.file_name,
                outcome.error.as_deref().unwrap_or("failed")
            )?,
            OutcomeStatus::Skipped => writeln!(
                out,
                "  ⚠️  {}: {}",
                outcome.file_name,
                outcome.error.as_deref().unwrap_or("skipped")
            )?,
        }
    }

    writeln!(
        out,
        "{} {}, {} failed in {}ms",
        report.count(done),
        match report.direction {
            MigrationDirection::Up => "applied",
            MigrationDirection::Down => "reverted",
        },
        report.count(OutcomeStatus::Failed),
        report.execution_time_ms
    )?;

    Ok(())
}

fn write_status(entries: &[MigrationStatusEntry], out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "Migration Status:")?;
    writeln!(out, "================")?;

    if entries.is_empty() {
        writeln!(out, "No migrations found")?;
        return Ok(());
    }

    for entry in entries {
        let unregistered = if entry.registered { "" } else { " (not registered)" };
        match &entry.state {
            MigrationState::Applied { group_id, .. } => {
                writeln!(out, "  ✅ {} [{}]{}", entry.file_name, group_id, unregistered)?
            }
            MigrationState::Pending => writeln!(out, "  ⏳ {}{}", entry.file_name, unregistered)?,
            MigrationState::Missing { group_id, .. } => {
                writeln!(out, "  ⚠️  {} [{}] (file missing)", entry.file_name, group_id)?
            }
        }
    }

    writeln!(out, "\n✅ = Applied  ⏳ = Pending  ⚠️ = Missing")?;
    Ok(())
}
