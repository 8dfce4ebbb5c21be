use std::fmt;

use crate::error::MigrateError;
use crate::script::Script;

/// Why an upgrade stopped.
#[derive(Debug)]
pub struct UpgradeError {
    /// The script being applied when the failure happened, if any.
    pub script: Option<String>,
    pub source: MigrateError,
}

impl UpgradeError {
    pub fn new(script: Option<String>, source: MigrateError) -> Self {
        Self { script, source }
    }
}

impl fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.script, &self.source) {
            // ScriptExecution already names the script.
            (_, MigrateError::ScriptExecution { .. }) | (None, _) => write!(f, "{}", self.source),
            (Some(script), source) => write!(f, "{} (while applying '{}')", source, script),
        }
    }
}

impl std::error::Error for UpgradeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Outcome of one upgrade engine run.
#[derive(Debug)]
pub struct UpgradeResult {
    scripts: Vec<Script>,
    error: Option<UpgradeError>,
}

impl UpgradeResult {
    pub fn success(scripts: Vec<Script>) -> Self {
        Self {
            scripts,
            error: None,
        }
    }

    pub fn failure(scripts: Vec<Script>, error: UpgradeError) -> Self {
        Self {
            scripts,
            error: Some(error),
        }
    }

    pub fn successful(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&UpgradeError> {
        self.error.as_ref()
    }

    /// Scripts committed during this run, in execution order.
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn into_error(self) -> Option<UpgradeError> {
        self.error
    }
}
