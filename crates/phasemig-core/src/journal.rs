use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A script recorded as applied in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub script_name: String,
    pub applied_at: DateTime<Utc>,
    /// Absent for rows written before checksums were recorded.
    pub checksum: Option<String>,
}

/// Location of the tracking journal table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalTable {
    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_table")]
    pub table: String,
}

impl JournalTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl Default for JournalTable {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            table: default_table(),
        }
    }
}

fn default_schema() -> String {
    "dbo".to_string()
}

fn default_table() -> String {
    "Schema".to_string()
}
