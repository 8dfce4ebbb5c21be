use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use phasemig_core::{JournalEntry, Result, Script};

use super::Journal;
use crate::dialect::{Session, Statement};

/// Tracks nothing: every script is pending on every run.
///
/// Used for the pre- and post-deployment phases and for one-off scripts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl Journal for NullJournal {
    fn ensure_exists<'a>(&'a self, _session: &'a mut dyn Session) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn applied_scripts<'a>(&'a self, _session: &'a mut dyn Session) -> BoxFuture<'a, Result<Vec<JournalEntry>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn record_applied(&self, _script: &Script, _applied_at: DateTime<Utc>) -> Option<Statement> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDatabase;

    #[tokio::test]
    async fn test_null_journal_touches_nothing() {
        let db = MockDatabase::new();
        let mut session = db.session();

        NullJournal.ensure_exists(&mut session).await.unwrap();
        assert!(NullJournal.applied_scripts(&mut session).await.unwrap().is_empty());
        assert!(NullJournal
            .record_applied(&Script::new("a.sql", "SELECT 1"), Utc::now())
            .is_none());
        assert!(!db.journal_created());
        assert!(db.executed().is_empty());
    }
}
