//! Database dialects and connections.
//!
//! A [`Dialect`] knows how to reach one kind of database, how that engine
//! splits a script into batches, and what the journal table looks like
//! there. A [`Session`] is one open connection created by a dialect.

mod batch;
mod connection;
mod mssql;
mod mysql;
mod postgres;

pub use batch::{split_go_batches, split_statements, SplitOptions};
pub use mssql::MssqlDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use phasemig_core::{DatabaseKind, JournalTable, Result};

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// One statement or batch sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    /// Empty for raw batches, which are sent as-is without preparation.
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A row read back from the server, every column rendered as text.
pub type Row = Vec<Option<String>>;

/// Failure inside [`Session::run_in_transaction`]. The transaction has
/// already been rolled back when this is returned.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionError {
    /// Index of the failing statement; `None` if BEGIN or COMMIT failed.
    pub statement: Option<usize>,
    pub message: String,
}

impl TransactionError {
    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Self {
            statement: Some(index),
            message: message.into(),
        }
    }

    pub fn control(message: impl Into<String>) -> Self {
        Self {
            statement: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.statement {
            Some(index) => write!(f, "statement {} failed: {}", index + 1, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// SQL used by the tracking journal on a given dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalStatements {
    /// Idempotent DDL creating the schema and table, and adding the
    /// `Checksum` column to tables that predate it.
    pub create: Vec<String>,
    /// Returns `(ScriptName, Applied as "YYYY-MM-DD HH:MM:SS" UTC, Checksum)`.
    pub select: String,
    /// Takes `(ScriptName, Applied, Checksum)` as parameters 1..3.
    pub insert: String,
}

/// One open connection to the target database.
pub trait Session: Send {
    /// Run SQL outside any explicit transaction.
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Run a query and collect its rows.
    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>>>;

    /// Run all statements in one transaction: commit if every statement
    /// succeeds, roll back and stop at the first failure otherwise.
    fn run_in_transaction<'a>(
        &'a mut self,
        statements: &'a [Statement],
    ) -> BoxFuture<'a, std::result::Result<(), TransactionError>>;

    /// Release the connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Per-engine strategy: connecting, batching, journal SQL.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    /// Check the connection string without connecting.
    fn validate_connection(&self, connection: &str) -> Result<()>;

    fn connect<'a>(&'a self, connection: &'a str) -> BoxFuture<'a, Result<Box<dyn Session>>>;

    /// Split a script into the batches sent to the server one by one.
    fn split_batches(&self, script: &str) -> Vec<String>;

    fn journal_statements(&self, table: &JournalTable) -> JournalStatements;
}

/// Select the dialect for a database kind.
pub fn dialect_for(kind: DatabaseKind) -> Arc<dyn Dialect> {
    match kind {
        DatabaseKind::Mssql => Arc::new(MssqlDialect),
        DatabaseKind::MySql => Arc::new(MySqlDialect),
        DatabaseKind::Postgres => Arc::new(PostgresDialect),
    }
}
