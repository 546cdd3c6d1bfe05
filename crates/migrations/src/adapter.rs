//! Database adapter abstractions
//!
//! The engine never talks to a driver directly. Each migration resolves its
//! connection by name through a [`DatabaseConnector`] and sends raw SQL to the
//! returned [`DatabaseAdapter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::error::MigrationResult;

/// Value bound to a statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DatabaseValue::Null, Into::into)
    }
}

/// Executes raw SQL against one named connection
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Execute a statement and return the affected row count
    async fn execute(&self, sql: &str) -> MigrationResult<u64>;

    /// Execute a statement with bound parameters (`$1`, `$2`, ...)
    async fn execute_with(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Begin a transaction, or `None` when the backend cannot wrap DDL in one
    async fn begin(&self) -> MigrationResult<Option<Box<dyn AdapterTransaction>>> {
        Ok(None)
    }
}

/// Transaction opened by [`DatabaseAdapter::begin`]
#[async_trait]
pub trait AdapterTransaction: Send {
    /// Execute a statement inside the transaction
    async fn execute(&mut self, sql: &str) -> MigrationResult<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Resolves connection names to adapters
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, name: &str) -> MigrationResult<Arc<dyn DatabaseAdapter>>;
}
