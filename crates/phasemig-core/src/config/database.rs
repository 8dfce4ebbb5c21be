use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::target::DatabaseKind;

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Engine type; `--type` overrides it.
    pub kind: Option<DatabaseKind>,

    /// Connection string; `--connection` overrides it.
    pub connection: Option<String>,

    /// How long to wait for a connection before failing the run.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: None,
            connection: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(config.kind.is_none());
    }

    #[test]
    fn test_parse_database_config() {
        let toml = r#"
            kind = "MSSQL"
            connection = "Server=localhost;Database=ows;User Id=sa;Password=pw"
        "#;

        let config: DatabaseConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.kind, Some(DatabaseKind::Mssql));
        assert_eq!(config.connect_timeout_secs, 30);
    }
}
