//! In-memory database for tests.
//!
//! [`MockDatabase`] keeps a list of committed statements and a journal table.
//! Transactions are staged and only applied on commit, so atomicity can be
//! asserted without a real server. Any statement containing `FAIL` errors.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use phasemig_core::{DatabaseKind, JournalTable, MigrateError, Reporter, Result};

use crate::dialect::{
    split_statements, Dialect, JournalStatements, Row, Session, SplitOptions, SqlValue, Statement,
    TransactionError,
};

pub const CREATE_JOURNAL: &str = "CREATE JOURNAL";
pub const UPGRADE_JOURNAL: &str = "UPGRADE JOURNAL";
pub const SELECT_JOURNAL: &str = "SELECT JOURNAL";
pub const INSERT_JOURNAL: &str = "INSERT JOURNAL";

#[derive(Debug, Clone)]
struct JournalRow {
    name: String,
    applied_at: DateTime<Utc>,
    checksum: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    committed: Vec<String>,
    executed: Vec<String>,
    journal: Option<Vec<JournalRow>>,
    /// Whether the journal table has the `Checksum` column.
    checksum_column: bool,
    connects: usize,
    closes: usize,
    rollbacks: usize,
    fail_connections: bool,
    fail_journal_writes: bool,
}

/// Shared handle to one simulated database.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<State>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// An open session without going through a dialect.
    pub fn session(&self) -> MockSession {
        MockSession { db: self.clone() }
    }

    /// Statements whose effects are committed, in commit order.
    pub fn committed(&self) -> Vec<String> {
        self.lock().committed.clone()
    }

    /// Every statement the server received, committed or not.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn journal_created(&self) -> bool {
        self.lock().journal.is_some()
    }

    /// Script names in the journal table, sorted.
    pub fn journal_names(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state
            .journal
            .iter()
            .flatten()
            .map(|row| row.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Insert a journal row directly, creating the table if needed.
    pub fn seed_journal(&self, name: &str, checksum: Option<&str>) {
        let mut state = self.lock();
        if state.journal.is_none() {
            state.checksum_column = true;
        }
        state.journal.get_or_insert_with(Vec::new).push(JournalRow {
            name: name.to_string(),
            applied_at: Utc::now(),
            checksum: checksum.map(str::to_string),
        });
    }

    /// Insert a row into a journal table that only has `ScriptName` and
    /// `Applied`, creating that table if needed.
    pub fn seed_legacy_journal(&self, name: &str) {
        self.lock().journal.get_or_insert_with(Vec::new).push(JournalRow {
            name: name.to_string(),
            applied_at: Utc::now(),
            checksum: None,
        });
    }

    pub fn has_checksum_column(&self) -> bool {
        self.lock().checksum_column
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn fail_connections(&self, fail: bool) {
        self.lock().fail_connections = fail;
    }

    pub fn fail_journal_writes(&self, fail: bool) {
        self.lock().fail_journal_writes = fail;
    }

    fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.lock();
        state.executed.push(sql.to_string());
        if sql.contains("FAIL") {
            return Err(MigrateError::Database(format!("syntax error in '{}'", sql)));
        }
        if sql == CREATE_JOURNAL {
            if state.journal.is_none() {
                state.journal = Some(Vec::new());
                state.checksum_column = true;
            }
        } else if sql == UPGRADE_JOURNAL {
            if state.journal.is_none() {
                return Err(MigrateError::Database("journal table does not exist".into()));
            }
            state.checksum_column = true;
        } else {
            state.committed.push(sql.to_string());
        }
        Ok(())
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.executed.push(sql.to_string());
        if sql != SELECT_JOURNAL {
            return Ok(Vec::new());
        }

        let journal = state
            .journal
            .as_ref()
            .ok_or_else(|| MigrateError::Database("journal table does not exist".into()))?;
        if !state.checksum_column {
            return Err(MigrateError::Database("column \"Checksum\" does not exist".into()));
        }
        let mut rows: Vec<Row> = journal
            .iter()
            .map(|row| {
                vec![
                    Some(row.name.clone()),
                    Some(row.applied_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                    row.checksum.clone(),
                ]
            })
            .collect();
        rows.sort();
        Ok(rows)
    }

    fn transaction(&self, statements: &[Statement]) -> std::result::Result<(), TransactionError> {
        let mut state = self.lock();
        let mut staged = Vec::new();
        let mut staged_journal = Vec::new();

        for (index, statement) in statements.iter().enumerate() {
            state.executed.push(statement.sql.clone());

            let outcome = if statement.sql.contains("FAIL") {
                Err(format!("syntax error in '{}'", statement.sql))
            } else if statement.sql == INSERT_JOURNAL {
                journal_insert(&state, &staged_journal, &statement.params).map(|row| staged_journal.push(row))
            } else {
                staged.push(statement.sql.clone());
                Ok(())
            };

            if let Err(message) = outcome {
                state.rollbacks += 1;
                return Err(TransactionError::at(index, message));
            }
        }

        state.committed.extend(staged);
        if let Some(journal) = state.journal.as_mut() {
            journal.extend(staged_journal);
        }
        Ok(())
    }
}

fn journal_insert(
    state: &State,
    staged: &[JournalRow],
    params: &[SqlValue],
) -> std::result::Result<JournalRow, String> {
    if state.fail_journal_writes {
        return Err("permission denied for journal table".into());
    }
    let journal = state.journal.as_ref().ok_or("journal table does not exist")?;
    if !state.checksum_column {
        return Err("column \"Checksum\" does not exist".into());
    }

    let row = match params {
        [SqlValue::Text(name), SqlValue::Timestamp(applied_at), SqlValue::Text(checksum)] => JournalRow {
            name: name.clone(),
            applied_at: *applied_at,
            checksum: Some(checksum.clone()),
        },
        _ => return Err(format!("unexpected journal parameters: {:?}", params)),
    };

    if journal.iter().chain(staged).any(|r| r.name == row.name) {
        return Err(format!("duplicate key '{}'", row.name));
    }
    Ok(row)
}

/// Session on a [`MockDatabase`].
#[derive(Debug)]
pub struct MockSession {
    db: MockDatabase,
}

impl Session for MockSession {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        let result = self.db.execute(sql);
        Box::pin(async move { result })
    }

    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>>> {
        let result = self.db.query(sql);
        Box::pin(async move { result })
    }

    fn run_in_transaction<'a>(
        &'a mut self,
        statements: &'a [Statement],
    ) -> BoxFuture<'a, std::result::Result<(), TransactionError>> {
        let result = self.db.transaction(statements);
        Box::pin(async move { result })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        self.db.lock().closes += 1;
        Box::pin(async { Ok(()) })
    }
}

/// Dialect connecting to a [`MockDatabase`]. Splits like Postgres.
#[derive(Debug, Clone)]
pub struct MockDialect {
    db: MockDatabase,
}

impl MockDialect {
    pub fn new(db: MockDatabase) -> Self {
        Self { db }
    }
}

impl Dialect for MockDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn validate_connection(&self, _connection: &str) -> Result<()> {
        Ok(())
    }

    fn connect<'a>(&'a self, _connection: &'a str) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        let result = {
            let mut state = self.db.lock();
            if state.fail_connections {
                Err(MigrateError::Database("connection refused".into()))
            } else {
                state.connects += 1;
                Ok(Box::new(self.db.session()) as Box<dyn Session>)
            }
        };
        Box::pin(async move { result })
    }

    fn split_batches(&self, script: &str) -> Vec<String> {
        split_statements(script, &SplitOptions::postgres())
    }

    fn journal_statements(&self, _table: &JournalTable) -> JournalStatements {
        JournalStatements {
            create: vec![CREATE_JOURNAL.to_string(), UPGRADE_JOURNAL.to_string()],
            select: SELECT_JOURNAL.to_string(),
            insert: INSERT_JOURNAL.to_string(),
        }
    }
}

/// Reporter that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(Level, String)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Success,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, level: Level, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((level, message.to_string()));
    }

    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn at(&self, level: Level) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }

    fn success(&self, message: &str) {
        self.push(Level::Success, message);
    }
}
