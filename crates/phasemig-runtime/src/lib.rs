pub mod dialect;
pub mod engine;
pub mod journal;
pub mod orchestrator;
pub mod scripts;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dialect::{dialect_for, Dialect, Session, SqlValue, Statement};
pub use engine::{EngineState, UpgradeEngine, UpgradeEngineBuilder};
pub use journal::{Journal, NullJournal, TableJournal};
pub use orchestrator::{MigrationOrchestrator, MigrationReport, Phase};
pub use scripts::{FileSystemScriptSource, ScriptSource};
