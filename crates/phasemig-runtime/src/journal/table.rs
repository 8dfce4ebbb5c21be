use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use phasemig_core::{JournalEntry, JournalTable, MigrateError, Result, Script};
use tracing::debug;

use super::Journal;
use crate::dialect::{Dialect, JournalStatements, Row, Session, SqlValue, Statement};

const APPLIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Journal backed by a table in the target database.
#[derive(Debug, Clone)]
pub struct TableJournal {
    table: JournalTable,
    statements: JournalStatements,
}

impl TableJournal {
    pub fn new(dialect: &dyn Dialect, table: JournalTable) -> Self {
        let statements = dialect.journal_statements(&table);
        Self { table, statements }
    }

    pub fn table(&self) -> &JournalTable {
        &self.table
    }
}

impl Journal for TableJournal {
    fn ensure_exists<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for sql in &self.statements.create {
                session.execute(sql).await.map_err(|e| {
                    MigrateError::Journal(format!(
                        "Failed to create journal table {}.{}: {}",
                        self.table.schema, self.table.table, e
                    ))
                })?;
            }
            debug!("Journal table {}.{} ready", self.table.schema, self.table.table);
            Ok(())
        })
    }

    fn applied_scripts<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, Result<Vec<JournalEntry>>> {
        Box::pin(async move {
            let rows = session.query(&self.statements.select).await.map_err(|e| {
                MigrateError::Journal(format!("Failed to read journal: {}", e))
            })?;
            rows.into_iter().map(parse_entry).collect()
        })
    }

    fn record_applied(&self, script: &Script, applied_at: DateTime<Utc>) -> Option<Statement> {
        Some(Statement::with_params(
            self.statements.insert.clone(),
            vec![
                SqlValue::Text(script.name.clone()),
                SqlValue::Timestamp(applied_at),
                SqlValue::Text(script.checksum.clone()),
            ],
        ))
    }
}

fn parse_entry(row: Row) -> Result<JournalEntry> {
    let mut columns = row.into_iter();
    let script_name = columns
        .next()
        .flatten()
        .ok_or_else(|| MigrateError::Journal("Journal row has no script name".into()))?;
    let applied = columns
        .next()
        .flatten()
        .ok_or_else(|| MigrateError::Journal(format!("Journal row for '{}' has no timestamp", script_name)))?;
    let applied_at = NaiveDateTime::parse_from_str(&applied, APPLIED_FORMAT)
        .map_err(|e| {
            MigrateError::Journal(format!(
                "Invalid timestamp '{}' for '{}': {}",
                applied, script_name, e
            ))
        })?
        .and_utc();
    let checksum = columns.next().flatten();

    Ok(JournalEntry {
        script_name,
        applied_at,
        checksum,
    })
}
