//! PostgreSQL adapter and ledger over `sqlx`

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use trellis_core::DatabaseConfig;

use crate::adapter::{AdapterTransaction, DatabaseAdapter, DatabaseConnector, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{Ledger, LedgerRecord};

/// Adapter executing statements on a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    async fn execute(&self, sql: &str) -> MigrationResult<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn execute_with(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> MigrationResult<Option<Box<dyn AdapterTransaction>>> {
        let tx = self.pool.begin().await?;
        Ok(Some(Box::new(PostgresTransaction { tx })))
    }
}

/// PostgreSQL transaction; DDL is transactional on PostgreSQL
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl AdapterTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str) -> MigrationResult<u64> {
        let result = sqlx::query(sql).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Opens one pool per named connection, on first use
pub struct PostgresConnector {
    config: DatabaseConfig,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PostgresConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Pool for a named connection
    pub async fn pool(&self, name: &str) -> MigrationResult<PgPool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }

        let url = self.config.require_url(name)?;
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect(url)
            .await
            .map_err(|e| MigrationError::Connection {
                connection: name.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!("Opened connection pool '{}'", name);
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    async fn connect(&self, name: &str) -> MigrationResult<Arc<dyn DatabaseAdapter>> {
        let pool = self.pool(name).await?;
        Ok(Arc::new(PostgresAdapter::new(pool)))
    }
}

/// Ledger stored in a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    table: String,
}

impl PostgresLedger {
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the ledger table
    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id BIGSERIAL PRIMARY KEY,\n    \
                migration VARCHAR(255) NOT NULL UNIQUE,\n    \
                group_id VARCHAR(64) NOT NULL,\n    \
                created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
            );",
            self.table
        )
    }

    fn select_all_sql(&self) -> String {
        format!(
            "SELECT id, migration, group_id, created_at FROM {} ORDER BY id",
            self.table
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (migration, group_id) VALUES ($1, $2) \
             RETURNING id, migration, group_id, created_at",
            self.table
        )
    }

    fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = $1", self.table)
    }

    fn last_batch_sql(&self) -> String {
        format!(
            "SELECT id, migration, group_id, created_at FROM {table} \
             WHERE group_id = (SELECT MAX(group_id) FROM {table}) ORDER BY id",
            table = self.table
        )
    }

    fn latest_group_sql(&self) -> String {
        format!("SELECT MAX(group_id) FROM {}", self.table)
    }
}

fn record_from_row(row: &PgRow) -> MigrationResult<LedgerRecord> {
    Ok(LedgerRecord {
        id: row.try_get("id")?,
        migration: row.try_get("migration")?,
        group_id: row.try_get("group_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn prepare(&self) -> MigrationResult<()> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::Ledger {
                message: format!("Failed to create ledger table {}: {}", self.table, e),
            })?;
        Ok(())
    }

    async fn all(&self) -> MigrationResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&self.select_all_sql())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn add(&self, migration: &str, group_id: &str) -> MigrationResult<LedgerRecord> {
        let row = sqlx::query(&self.insert_sql())
            .bind(migration)
            .bind(group_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrationError::Ledger {
                message: format!("Failed to record {}: {}", migration, e),
            })?;
        record_from_row(&row)
    }

    async fn delete(&self, id: i64) -> MigrationResult<bool> {
        let result = sqlx::query(&self.delete_sql())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::Ledger {
                message: format!("Failed to delete ledger row {}: {}", id, e),
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn last_batch(&self) -> MigrationResult<Vec<LedgerRecord>> {
        let rows = sqlx::query(&self.last_batch_sql())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn latest_group(&self) -> MigrationResult<Option<String>> {
        let row = sqlx::query(&self.latest_group_sql())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<String>, _>(0)?)
    }
}
