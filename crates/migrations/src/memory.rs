//! In-process adapter and ledger
//!
//! [`MemoryDatabase`] understands just enough DDL to track which tables and
//! views exist, which tables reference which, and which rows were inserted.
//! It logs every statement it is sent and can be told to reject statements
//! containing a given fragment. [`MemoryLedger`] is a `Vec`-backed ledger.
//! Both are meant for exercising migrations without a database server.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::adapter::{AdapterTransaction, DatabaseAdapter, DatabaseConnector, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{Ledger, LedgerRecord};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeSet<String>,
    views: BTreeSet<String>,
    /// table -> tables it references
    references: BTreeMap<String, BTreeSet<String>>,
    rows: BTreeMap<String, Vec<Vec<DatabaseValue>>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: MemoryState,
    executed: Vec<String>,
    failures: Vec<String>,
}

/// Schema-tracking fake database
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<MemoryInner>>,
    transactional: bool,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            transactional: true,
        }
    }

    /// A database whose adapter reports no transaction support
    pub fn without_transactions() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    /// Reject every later statement containing `fragment`
    pub fn fail_on(&self, fragment: &str) {
        self.lock().failures.push(fragment.to_string());
    }

    /// Stop rejecting statements
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every statement that executed successfully, in order
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.lock().state.tables.contains(table)
    }

    pub fn has_view(&self, view: &str) -> bool {
        self.lock().state.views.contains(view)
    }

    pub fn tables(&self) -> Vec<String> {
        self.lock().state.tables.iter().cloned().collect()
    }

    /// Rows inserted into `table`, values in column order
    pub fn rows(&self, table: &str) -> Vec<Vec<DatabaseValue>> {
        self.lock().state.rows.get(table).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let mut inner = self.lock();

        if let Some(fragment) = inner.failures.iter().find(|f| sql.contains(f.as_str())) {
            return Err(MigrationError::Query {
                message: format!("statement rejected (matched '{}')", fragment),
            });
        }

        let affected = apply(&mut inner.state, sql, params)?;
        inner.executed.push(sql.to_string());
        Ok(affected)
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryDatabase {
    async fn execute(&self, sql: &str) -> MigrationResult<u64> {
        self.run(sql, &[])
    }

    async fn execute_with(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        self.run(sql, params)
    }

    async fn begin(&self) -> MigrationResult<Option<Box<dyn AdapterTransaction>>> {
        if !self.transactional {
            return Ok(None);
        }

        let snapshot = self.lock().state.clone();
        Ok(Some(Box::new(MemoryTransaction {
            database: self.clone(),
            snapshot,
        })))
    }
}

/// Snapshot transaction: rollback restores the schema seen at `begin`
struct MemoryTransaction {
    database: MemoryDatabase,
    snapshot: MemoryState,
}

#[async_trait]
impl AdapterTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> MigrationResult<u64> {
        self.database.run(sql, &[])
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        let MemoryTransaction { database, snapshot } = *self;
        database.lock().state = snapshot;
        Ok(())
    }
}

struct Patterns {
    create_table: Regex,
    drop_table: Regex,
    alter_table: Regex,
    create_view: Regex,
    drop_view: Regex,
    insert: Regex,
    values: Regex,
    references: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("valid statement pattern");
        Patterns {
            create_table: compile(r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(\w+)"),
            drop_table: compile(r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?(\w+)"),
            alter_table: compile(r"(?is)^\s*ALTER\s+TABLE\s+(\w+)"),
            create_view: compile(r"(?is)^\s*CREATE\s+(OR\s+REPLACE\s+)?VIEW\s+(\w+)"),
            drop_view: compile(r"(?is)^\s*DROP\s+VIEW\s+(IF\s+EXISTS\s+)?(\w+)"),
            insert: compile(r"(?is)^\s*INSERT\s+INTO\s+(\w+)"),
            values: compile(r"(?is)VALUES\s*\((.*)\)"),
            references: compile(r"(?i)REFERENCES\s+(\w+)"),
        }
    })
}

fn rejected(message: String) -> MigrationError {
    MigrationError::Query { message }
}

fn apply(state: &mut MemoryState, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
    let patterns = patterns();

    if let Some(captures) = patterns.create_table.captures(sql) {
        let if_not_exists = captures.get(1).is_some();
        let table = captures[2].to_string();

        if state.tables.contains(&table) {
            if if_not_exists {
                return Ok(0);
            }
            return Err(rejected(format!("relation \"{}\" already exists", table)));
        }

        let referenced: BTreeSet<String> = patterns
            .references
            .captures_iter(sql)
            .map(|c| c[1].to_string())
            .collect();
        if let Some(missing) = referenced
            .iter()
            .find(|r| **r != table && !state.tables.contains(*r))
        {
            return Err(rejected(format!("relation \"{}\" does not exist", missing)));
        }

        state.references.insert(table.clone(), referenced);
        state.tables.insert(table);
        return Ok(0);
    }

    if let Some(captures) = patterns.drop_table.captures(sql) {
        let if_exists = captures.get(1).is_some();
        let table = captures[2].to_string();

        if !state.tables.contains(&table) {
            if if_exists {
                return Ok(0);
            }
            return Err(rejected(format!("table \"{}\" does not exist", table)));
        }

        if let Some((dependent, _)) = state
            .references
            .iter()
            .find(|(other, refs)| **other != table && refs.contains(&table))
        {
            return Err(rejected(format!(
                "cannot drop table {} because table {} depends on it",
                table, dependent
            )));
        }

        state.tables.remove(&table);
        state.references.remove(&table);
        state.rows.remove(&table);
        return Ok(0);
    }

    if let Some(captures) = patterns.alter_table.captures(sql) {
        let table = captures[1].to_string();
        if !state.tables.contains(&table) {
            return Err(rejected(format!("relation \"{}\" does not exist", table)));
        }

        for captures in patterns.references.captures_iter(sql) {
            let referenced = captures[1].to_string();
            if !state.tables.contains(&referenced) {
                return Err(rejected(format!("relation \"{}\" does not exist", referenced)));
            }
            state
                .references
                .entry(table.clone())
                .or_default()
                .insert(referenced);
        }
        return Ok(0);
    }

    if let Some(captures) = patterns.create_view.captures(sql) {
        let or_replace = captures.get(1).is_some();
        let view = captures[2].to_string();
        if state.views.contains(&view) && !or_replace {
            return Err(rejected(format!("relation \"{}\" already exists", view)));
        }
        state.views.insert(view);
        return Ok(0);
    }

    if let Some(captures) = patterns.drop_view.captures(sql) {
        let if_exists = captures.get(1).is_some();
        let view = captures[2].to_string();
        if !state.views.remove(&view) && !if_exists {
            return Err(rejected(format!("view \"{}\" does not exist", view)));
        }
        return Ok(0);
    }

    if let Some(captures) = patterns.insert.captures(sql) {
        let table = captures[1].to_string();
        if !state.tables.contains(&table) {
            return Err(rejected(format!("relation \"{}\" does not exist", table)));
        }
        let row = match patterns.values.captures(sql) {
            Some(values) => values[1]
                .split(',')
                .map(|token| row_value(token.trim(), params))
                .collect(),
            None => params.to_vec(),
        };
        state.rows.entry(table).or_default().push(row);
        return Ok(1);
    }

    Ok(0)
}

/// Value of one VALUES entry: a `$n` parameter, or a literal kept as text
fn row_value(token: &str, params: &[DatabaseValue]) -> DatabaseValue {
    if token.eq_ignore_ascii_case("NULL") {
        return DatabaseValue::Null;
    }
    token
        .strip_prefix('$')
        .and_then(|index| index.parse::<usize>().ok())
        .and_then(|index| params.get(index.wrapping_sub(1)).cloned())
        .unwrap_or_else(|| DatabaseValue::from(token.trim_matches('\'')))
}

/// Hands out one [`MemoryDatabase`] per connection name
#[derive(Debug, Default)]
pub struct MemoryConnector {
    databases: Mutex<HashMap<String, MemoryDatabase>>,
    unavailable: Mutex<HashSet<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database behind a connection name, created on first use
    pub fn database(&self, name: &str) -> MemoryDatabase {
        let mut databases = self
            .databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        databases
            .entry(name.to_string())
            .or_insert_with(MemoryDatabase::new)
            .clone()
    }

    /// Use a specific database for a connection name
    pub fn insert(&self, name: &str, database: MemoryDatabase) {
        self.databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), database);
    }

    /// Make `connect(name)` fail from now on
    pub fn make_unavailable(&self, name: &str) {
        self.unavailable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string());
    }
}

#[async_trait]
impl DatabaseConnector for MemoryConnector {
    async fn connect(&self, name: &str) -> MigrationResult<Arc<dyn DatabaseAdapter>> {
        let unavailable = self
            .unavailable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(name);
        if unavailable {
            return Err(MigrationError::Connection {
                connection: name.to_string(),
                message: "connection refused".to_string(),
            });
        }

        Ok(Arc::new(self.database(name)))
    }
}

/// `Vec`-backed ledger
#[derive(Debug)]
pub struct MemoryLedger {
    records: Mutex<Vec<LedgerRecord>>,
    next_id: AtomicI64,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of every record, ordered by id
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LedgerRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn all(&self) -> MigrationResult<Vec<LedgerRecord>> {
        Ok(self.records())
    }

    async fn add(&self, migration: &str, group_id: &str) -> MigrationResult<LedgerRecord> {
        let mut records = self.lock();

        if records.iter().any(|record| record.migration == migration) {
            return Err(MigrationError::Ledger {
                message: format!("{} is already recorded", migration),
            });
        }

        let record = LedgerRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            migration: migration.to_string(),
            group_id: group_id.to_string(),
            created_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn delete(&self, id: i64) -> MigrationResult<bool> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|record| record.id != id);
        Ok(records.len() != before)
    }
}
