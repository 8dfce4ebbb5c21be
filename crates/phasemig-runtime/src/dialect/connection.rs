//! `Key=Value;...` connection strings for the sqlx-backed dialects.

use phasemig_core::{MigrateError, Result};

/// Connection settings parsed from an ADO.NET-style connection string.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: Option<String>,
}

/// Whether `connection` is a URL for one of `schemes` rather than a key/value string.
pub(crate) fn is_url(connection: &str, schemes: &[&str]) -> bool {
    let connection = connection.trim_start();
    schemes.iter().any(|scheme| {
        connection
            .get(..scheme.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .unwrap_or(false)
    })
}

/// Parse `Host=db;Port=5432;Database=app;Username=u;Password=p`.
///
/// Keys are case-insensitive and the common aliases (`Server`, `Data Source`,
/// `Initial Catalog`, `User Id`, `Uid`, `Pwd`, ...) are accepted.
pub(crate) fn parse_key_value(connection: &str) -> Result<ConnectionParams> {
    let mut params = ConnectionParams::default();

    for pair in connection.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (key, value) = pair.split_once('=').ok_or_else(|| {
            MigrateError::Configuration(format!(
                "Malformed connection string segment '{}' (expected Key=Value)",
                redact(pair)
            ))
        })?;
        let value = value.trim().to_string();
        let key: String = key
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "host" | "server" | "datasource" | "address" => params.host = Some(value),
            "port" => {
                let port = value.parse().map_err(|_| {
                    MigrateError::Configuration(format!("Invalid port '{}' in connection string", value))
                })?;
                params.port = Some(port);
            }
            "database" | "initialcatalog" => params.database = Some(value),
            "username" | "userid" | "uid" | "user" => params.username = Some(value),
            "password" | "pwd" => params.password = Some(value),
            "sslmode" => params.ssl_mode = Some(value),
            _ => {
                return Err(MigrateError::Configuration(format!(
                    "Unsupported connection string key '{}'",
                    key
                )))
            }
        }
    }

    Ok(params)
}

fn redact(pair: &str) -> &str {
    if pair.to_ascii_lowercase().contains("password") || pair.to_ascii_lowercase().contains("pwd") {
        "<redacted>"
    } else {
        pair
    }
}
