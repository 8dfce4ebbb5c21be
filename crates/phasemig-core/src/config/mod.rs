mod database;
mod logging;

pub use database::DatabaseConfig;
pub use logging::LoggingConfig;

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};
use crate::journal::JournalTable;

/// Root configuration, usually read from `phasemig.toml`.
///
/// Every field is optional; command-line flags take precedence over
/// whatever is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasemigConfig {
    /// Target database.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tracking journal location.
    #[serde(default)]
    pub journal: JournalTable,

    /// Script discovery.
    #[serde(default)]
    pub scripts: ScriptsConfig,

    /// Diagnostic logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PhasemigConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MigrateError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| MigrateError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Script discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Root holding `<DatabaseKind>/{PreDeployment,Migrations,PostDeployment}`.
    pub root: Option<PathBuf>,

    /// File extension of scripts, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            root: None,
            extension: default_extension(),
        }
    }
}

fn default_extension() -> String {
    "sql".to_string()
}

/// Replace `${VAR}` with the variable's value. Unset variables are left as-is.
fn substitute_env_vars(content: &str) -> String {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid pattern");
    pattern
        .replace_all(content, |caps: &Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
