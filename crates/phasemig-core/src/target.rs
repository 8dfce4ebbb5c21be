use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DatabaseKind {
    Mssql,
    MySql,
    Postgres,
}

impl DatabaseKind {
    pub const ALL: [DatabaseKind; 3] = [DatabaseKind::Mssql, DatabaseKind::MySql, DatabaseKind::Postgres];

    /// Canonical name, also used as the per-engine folder under the scripts root.
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Mssql => "MSSQL",
            DatabaseKind::MySql => "MySQL",
            DatabaseKind::Postgres => "Postgres",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(DatabaseKind::Mssql),
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            other => Err(MigrateError::Configuration(format!(
                "Unknown database type '{}' (expected MSSQL, MySQL or Postgres)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for DatabaseKind {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DatabaseKind> for String {
    fn from(kind: DatabaseKind) -> Self {
        kind.as_str().to_string()
    }
}

/// The database a run is aimed at.
#[derive(Clone)]
pub struct DatabaseTarget {
    pub kind: DatabaseKind,
    pub connection: String,
}

impl DatabaseTarget {
    pub fn new(kind: DatabaseKind, connection: impl Into<String>) -> Result<Self> {
        let connection = connection.into();
        if connection.trim().is_empty() {
            return Err(MigrateError::Configuration(
                "Connection string must not be empty".into(),
            ));
        }
        Ok(Self { kind, connection })
    }
}

// Connection strings carry credentials; keep them out of logs.
impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("kind", &self.kind)
            .field("connection", &"<redacted>")
            .finish()
    }
}
