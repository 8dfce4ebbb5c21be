//! Journal stores: which scripts have already been applied.

mod null;
mod table;

pub use null::NullJournal;
pub use table::TableJournal;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use phasemig_core::{JournalEntry, Result, Script};

use crate::dialect::{Session, Statement};

/// Persistence for applied script names.
///
/// Recording is not a separate round trip: [`Journal::record_applied`]
/// returns a statement that the engine runs inside the script's own
/// transaction, so a script and its journal row commit together.
pub trait Journal: Send + Sync {
    /// Create the journal storage if it does not exist yet.
    fn ensure_exists<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, Result<()>>;

    /// All recorded entries, ordered by script name.
    fn applied_scripts<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, Result<Vec<JournalEntry>>>;

    /// Statement recording `script` as applied, or `None` if nothing is tracked.
    fn record_applied(&self, script: &Script, applied_at: DateTime<Utc>) -> Option<Statement>;
}

impl<J: Journal + ?Sized> Journal for Box<J> {
    fn ensure_exists<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, Result<()>> {
        (**self).ensure_exists(session)
    }

    fn applied_scripts<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, Result<Vec<JournalEntry>>> {
        (**self).applied_scripts(session)
    }

    fn record_applied(&self, script: &Script, applied_at: DateTime<Utc>) -> Option<Statement> {
        (**self).record_applied(script, applied_at)
    }
}

/// Whether `entries` contain a record for `name`.
pub fn has_been_applied(entries: &[JournalEntry], name: &str) -> bool {
    entries.iter().any(|e| e.script_name == name)
}
