use std::str::FromStr;

use futures::future::BoxFuture;
use phasemig_core::{DatabaseKind, JournalTable, MigrateError, Result};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgSslMode, Postgres};
use sqlx::query::Query;
use sqlx::{Connection, Row as _};
use tracing::{debug, warn};

use super::batch::{split_statements, SplitOptions};
use super::connection::{is_url, parse_key_value};
use super::{Dialect, JournalStatements, Row, Session, SqlValue, Statement, TransactionError};

/// PostgreSQL, via sqlx.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Accepts `postgres://` URLs or Npgsql-style `Host=...;Database=...` strings.
    pub fn connect_options(connection: &str) -> Result<PgConnectOptions> {
        if is_url(connection, &["postgres://", "postgresql://"]) {
            return PgConnectOptions::from_str(connection.trim())
                .map_err(|e| MigrateError::Configuration(format!("Invalid Postgres URL: {}", e)));
        }

        let params = parse_key_value(connection)?;
        let mut options = PgConnectOptions::new();
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
            let mode = PgSslMode::from_str(&mode.to_ascii_lowercase()).map_err(|e| {
                MigrateError::Configuration(format!("Invalid SSL mode '{}': {}", mode, e))
            })?;
            options = options.ssl_mode(mode);
        }
        Ok(options)
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    fn validate_connection(&self, connection: &str) -> Result<()> {
        Self::connect_options(connection).map(|_| ())
    }

    fn connect<'a>(&'a self, connection: &'a str) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        Box::pin(async move {
            let options = Self::connect_options(connection)?;
            let conn = PgConnection::connect_with(&options)
                .await
                .map_err(|e| MigrateError::Database(format!("Failed to connect to Postgres: {}", e)))?;
            debug!("Connected to Postgres");
            Ok(Box::new(PgSession { conn }) as Box<dyn Session>)
        })
    }

    fn split_batches(&self, script: &str) -> Vec<String> {
        split_statements(script, &SplitOptions::postgres())
    }

    fn journal_statements(&self, table: &JournalTable) -> JournalStatements {
        let schema = quote_ident(&table.schema);
        let qualified = format!("{}.{}", schema, quote_ident(&table.table));

        JournalStatements {
            create: vec![
                format!(
                    "DO $$ BEGIN IF NOT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = {}) THEN EXECUTE {}; END IF; END $$",
                    quote_literal(&table.schema),
                    quote_literal(&format!("CREATE SCHEMA {}", schema)),
                ),
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {} ("ScriptName" VARCHAR(255) NOT NULL PRIMARY KEY, "Applied" TIMESTAMPTZ NOT NULL, "Checksum" VARCHAR(64))"#,
                    qualified
                ),
                format!(r#"ALTER TABLE {} ADD COLUMN IF NOT EXISTS "Checksum" VARCHAR(64)"#, qualified),
            ],
            select: format!(
                r#"SELECT "ScriptName", to_char("Applied" AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), "Checksum" FROM {} ORDER BY "ScriptName""#,
                qualified
            ),
            insert: format!(
                r#"INSERT INTO {} ("ScriptName", "Applied", "Checksum") VALUES ($1, $2, $3)"#,
                qualified
            ),
        }
    }
}

struct PgSession {
    conn: PgConnection,
}

impl Session for PgSession {
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
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Text(value) => query.bind(value.as_str()),
            SqlValue::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
