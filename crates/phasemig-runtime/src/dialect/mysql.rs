use std::str::FromStr;

use futures::future::BoxFuture;
use phasemig_core::{DatabaseKind, JournalTable, MigrateError, Result};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Connection, Row as _};
use tracing::{debug, warn};

use super::batch::{split_statements, SplitOptions};
use super::connection::{is_url, parse_key_value};
use super::{Dialect, JournalStatements, Row, Session, SqlValue, Statement, TransactionError};

/// MySQL and MariaDB, via sqlx.
///
/// MySQL commits implicitly after DDL, so a failing script only rolls back
/// the DML that ran since its last DDL statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Accepts `mysql://` URLs or MySqlConnector-style `Server=...;Database=...` strings.
    pub fn connect_options(connection: &str) -> Result<MySqlConnectOptions> {
        if is_url(connection, &["mysql://", "mariadb://"]) {
            return MySqlConnectOptions::from_str(connection.trim())
                .map_err(|e| MigrateError::Configuration(format!("Invalid MySQL URL: {}", e)));
        }

        let params = parse_key_value(connection)?;
        let mut options = MySqlConnectOptions::new();
        if let Some(host) = &params.host {
            options = options.host(host);
        }
        if let Some(port) = params.port {
            options = options.port(port);
        }
        if let Some(database) = &params.database {
            options = options.database(database);
        }
        if let Some(username) = &params.username {
            options = options.username(username);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }
        if let Some(mode) = &params.ssl_mode {
            let mode = MySqlSslMode::from_str(&mode.to_ascii_lowercase()).map_err(|e| {
                MigrateError::Configuration(format!("Invalid SSL mode '{}': {}", mode, e))
            })?;
            options = options.ssl_mode(mode);
        }
        Ok(options)
    }
}

impl Dialect for MySqlDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    fn validate_connection(&self, connection: &str) -> Result<()> {
        Self::connect_options(connection).map(|_| ())
    }

    fn connect<'a>(&'a self, connection: &'a str) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        Box::pin(async move {
            let options = Self::connect_options(connection)?;
            let conn = MySqlConnection::connect_with(&options)
                .await
                .map_err(|e| MigrateError::Database(format!("Failed to connect to MySQL: {}", e)))?;
            debug!("Connected to MySQL");
            Ok(Box::new(MySqlSession { conn }) as Box<dyn Session>)
        })
    }

    fn split_batches(&self, script: &str) -> Vec<String> {
        split_statements(script, &SplitOptions::mysql())
    }

    /// The journal lives in the connection's database; MySQL has no schemas
    /// below the database, so `table.schema` is not used.
    fn journal_statements(&self, table: &JournalTable) -> JournalStatements {
        if ignores_schema(table) {
            warn!(
                "Journal schema '{}' is ignored on MySQL; the table is created in the connection's database",
                table.schema
            );
        }

        let name = table.table.as_str();
        let table = quote_ident(name);
        let add_checksum = format!("ALTER TABLE {} ADD COLUMN `Checksum` VARCHAR(64) NULL", table);

        JournalStatements {
            create: vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (`ScriptName` VARCHAR(255) NOT NULL PRIMARY KEY, `Applied` DATETIME NOT NULL, `Checksum` VARCHAR(64) NULL)",
                    table
                ),
                // No ADD COLUMN IF NOT EXISTS on MySQL.
                format!(
                    "SET @phasemig_ddl = (SELECT IF(COUNT(*) = 0, {}, 'DO 0') FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} AND COLUMN_NAME = 'Checksum')",
                    quote_literal(&add_checksum),
                    quote_literal(name)
                ),
                "PREPARE phasemig_ddl FROM @phasemig_ddl".to_string(),
                "EXECUTE phasemig_ddl".to_string(),
                "DEALLOCATE PREPARE phasemig_ddl".to_string(),
            ],
            select: format!(
                "SELECT `ScriptName`, CAST(DATE_FORMAT(`Applied`, '%Y-%m-%d %H:%i:%s') AS CHAR), `Checksum` FROM {} ORDER BY `ScriptName`",
                table
            ),
            insert: format!(
                "INSERT INTO {} (`ScriptName`, `Applied`, `Checksum`) VALUES (?, ?, ?)",
                table
            ),
        }
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

impl Session for MySqlSession {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql))
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let rows = sqlx::query(sql)
                .fetch_all(&mut self.conn)
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))?;

            rows.iter()
                .map(|row| {
                    (0..row.len())
                        .map(|i| row.try_get::<Option<String>, _>(i))
                        .collect::<std::result::Result<Row, _>>()
                        .map_err(|e| MigrateError::Database(e.to_string()))
                })
                .collect()
        })
    }

    fn run_in_transaction<'a>(
        &'a mut self,
        statements: &'a [Statement],
    ) -> BoxFuture<'a, std::result::Result<(), TransactionError>> {
        Box::pin(async move {
            let mut tx = self
                .conn
                .begin()
                .await
                .map_err(|e| TransactionError::control(format!("Failed to begin transaction: {}", e)))?;

            for (index, statement) in statements.iter().enumerate() {
                let outcome = if statement.params.is_empty() {
                    sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&statement.sql)).await.map(|_| ())
                } else {
                    bind_params(sqlx::query(&statement.sql), &statement.params)
                        .execute(&mut *tx)
                        .await
                        .map(|_| ())
                };

                if let Err(e) = outcome {
                    if let Err(rollback) = tx.rollback().await {
                        warn!("Failed to roll back transaction: {}", rollback);
                    }
                    return Err(TransactionError::at(index, e.to_string()));
                }
            }

            tx.commit()
                .await
                .map_err(|e| TransactionError::control(format!("Failed to commit transaction: {}", e)))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.conn
                .close()
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))
        })
    }
}

fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            SqlValue::Text(value) => query.bind(value.as_str()),
            SqlValue::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn ignores_schema(table: &JournalTable) -> bool {
    table.schema != JournalTable::default().schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_connection_string() {
        let options = MySqlDialect::connect_options("mysql://root:pw@db.local:3307/ows").unwrap();
        assert_eq!(options.get_host(), "db.local");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_database(), Some("ows"));
        assert_eq!(options.get_username(), "root");
    }

    #[test]
    fn test_key_value_connection_string() {
        let options =
            MySqlDialect::connect_options("Server=db.local;Port=3307;Database=ows;Uid=root;Pwd=pw").unwrap();
        assert_eq!(options.get_host(), "db.local");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_database(), Some("ows"));
    }

    #[test]
    fn test_journal_ignores_schema() {
        let stmts = MySqlDialect.journal_statements(&JournalTable::default());
        assert!(stmts.create[0].starts_with("CREATE TABLE IF NOT EXISTS `Schema`"));
        assert!(!stmts.select.contains("dbo"));
        assert!(stmts.insert.ends_with("VALUES (?, ?, ?)"));

        assert!(!ignores_schema(&JournalTable::default()));
        assert!(ignores_schema(&JournalTable::new("ows", "Schema")));
        let custom = MySqlDialect.journal_statements(&JournalTable::new("ows", "Schema"));
        assert!(!custom.select.contains("ows"));
    }

    #[test]
    fn test_journal_adds_missing_checksum_column() {
        let stmts = MySqlDialect.journal_statements(&JournalTable::default());
        assert_eq!(stmts.create.len(), 5);
        assert!(stmts.create[1].contains(
            "IF(COUNT(*) = 0, 'ALTER TABLE `Schema` ADD COLUMN `Checksum` VARCHAR(64) NULL', 'DO 0')"
        ));
        assert!(stmts.create[1].contains("TABLE_NAME = 'Schema' AND COLUMN_NAME = 'Checksum'"));
        assert_eq!(stmts.create[2], "PREPARE phasemig_ddl FROM @phasemig_ddl");
        assert_eq!(stmts.create[3], "EXECUTE phasemig_ddl");
        assert_eq!(stmts.create[4], "DEALLOCATE PREPARE phasemig_ddl");
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_split_batches_honours_delimiter() {
        let script = "DELIMITER $$\nCREATE TRIGGER t BEFORE INSERT ON a FOR EACH ROW BEGIN SET NEW.x = 1; END$$\nDELIMITER ;\nSELECT 1;";
        let batches = MySqlDialect.split_batches(script);
        assert_eq!(batches.len(), 2);
        assert!(batches[0].ends_with("END"));
    }
}
