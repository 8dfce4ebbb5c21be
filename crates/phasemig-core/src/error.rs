use thiserror::Error;

/// Core error type for phasemig operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// The script root or one of its files could not be read.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// A script's SQL failed; its transaction was rolled back.
    #[error("Script '{script}' failed: {message}")]
    ScriptExecution { script: String, message: String },

    /// The journal table could not be created, read or written.
    #[error("Journal error: {0}")]
    Journal(String),

    /// Unknown database kind, malformed connection string, missing input.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection or transport failure outside a single script.
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Whether this error was raised before any script could run.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MigrateError::Configuration(_))
    }
}

/// Result type alias using MigrateError.
pub type Result<T> = std::result::Result<T, MigrateError>;
