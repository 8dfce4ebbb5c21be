pub mod config;
pub mod error;
pub mod journal;
pub mod reporter;
pub mod result;
pub mod script;
pub mod target;

pub use config::{DatabaseConfig, LoggingConfig, PhasemigConfig, ScriptsConfig};
pub use error::{MigrateError, Result};
pub use journal::{JournalEntry, JournalTable};
pub use reporter::{Reporter, TracingReporter};
pub use result::{UpgradeError, UpgradeResult};
pub use script::{sort_by_name, Script};
pub use target::{DatabaseKind, DatabaseTarget};
