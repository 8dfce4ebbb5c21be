//! Script discovery.

mod filesystem;

pub use filesystem::FileSystemScriptSource;

use phasemig_core::{sort_by_name, Result, Script};

/// Produces the scripts for one engine run, in application order.
pub trait ScriptSource: Send + Sync {
    /// Enumerate scripts, sorted by name.
    ///
    /// Any script that cannot be read fails the whole call.
    fn scripts(&self) -> Result<Vec<Script>>;

    /// Human-readable location, used in progress messages.
    fn describe(&self) -> String;

    /// False when the source points at nothing (e.g. a missing directory).
    fn exists(&self) -> bool {
        true
    }
}

/// In-memory source; handy for embedding scripts in a binary.
impl ScriptSource for Vec<Script> {
    fn scripts(&self) -> Result<Vec<Script>> {
        let mut scripts = self.clone();
        sort_by_name(&mut scripts);
        Ok(scripts)
    }

    fn describe(&self) -> String {
        format!("{} embedded script(s)", self.len())
    }
}
