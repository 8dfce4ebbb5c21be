use futures::future::BoxFuture;
use phasemig_core::{DatabaseKind, JournalTable, MigrateError, Result};
use tiberius::{Client, Config, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use super::batch::split_go_batches;
use super::{Dialect, JournalStatements, Row, Session, SqlValue, Statement, TransactionError};

type MssqlClient = Client<Compat<TcpStream>>;

/// Microsoft SQL Server, via tiberius.
#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Accepts ADO.NET (`Server=tcp:host,1433;Database=...`) or `jdbc:sqlserver://` strings.
    pub fn config(connection: &str) -> Result<Config> {
        let connection = connection.trim();
        let is_jdbc = connection
            .get(..5)
            .map(|prefix| prefix.eq_ignore_ascii_case("jdbc:"))
            .unwrap_or(false);
        let parsed = if is_jdbc {
            Config::from_jdbc_string(connection)
        } else {
            Config::from_ado_string(connection)
        };
        parsed.map_err(|e| MigrateError::Configuration(format!("Invalid SQL Server connection string: {}", e)))
    }

    async fn open(config: Config) -> tiberius::Result<MssqlClient> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        match Client::connect(config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL may redirect to another node
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!("Redirected to {}:{}", host, port);
                let mut config = config;
                config.host(&host);
                config.port(port);

                let tcp = TcpStream::connect(config.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Client::connect(config, tcp.compat_write()).await
            }
            Err(e) => Err(e),
        }
    }
}

impl Dialect for MssqlDialect {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Mssql
    }

    fn validate_connection(&self, connection: &str) -> Result<()> {
        Self::config(connection).map(|_| ())
    }

    fn connect<'a>(&'a self, connection: &'a str) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        Box::pin(async move {
            let config = Self::config(connection)?;
            let client = Self::open(config)
                .await
                .map_err(|e| MigrateError::Database(format!("Failed to connect to SQL Server: {}", e)))?;
            debug!("Connected to SQL Server");
            Ok(Box::new(MssqlSession { client }) as Box<dyn Session>)
        })
    }

    fn split_batches(&self, script: &str) -> Vec<String> {
        split_go_batches(script)
    }

    fn journal_statements(&self, table: &JournalTable) -> JournalStatements {
        let schema = quote_ident(&table.schema);
        let qualified = format!("{}.{}", schema, quote_ident(&table.table));

        JournalStatements {
            create: vec![
                format!(
                    "IF SCHEMA_ID({}) IS NULL EXEC({})",
                    quote_literal(&table.schema),
                    quote_literal(&format!("CREATE SCHEMA {}", schema)),
                ),
                format!(
                    "IF OBJECT_ID({}, N'U') IS NULL CREATE TABLE {} ([ScriptName] NVARCHAR(255) NOT NULL PRIMARY KEY, [Applied] DATETIME2 NOT NULL, [Checksum] NVARCHAR(64) NULL)",
                    quote_literal(&qualified),
                    qualified
                ),
                format!(
                    "IF COL_LENGTH({}, N'Checksum') IS NULL ALTER TABLE {} ADD [Checksum] NVARCHAR(64) NULL",
                    quote_literal(&qualified),
                    qualified
                ),
            ],
            select: format!(
                "SELECT [ScriptName], CONVERT(NVARCHAR(19), [Applied], 120), [Checksum] FROM {} ORDER BY [ScriptName]",
                qualified
            ),
            insert: format!(
                "INSERT INTO {} ([ScriptName], [Applied], [Checksum]) VALUES (@P1, @P2, @P3)",
                qualified
            ),
        }
    }
}

struct MssqlSession {
    client: MssqlClient,
}

impl MssqlSession {
    async fn batch(&mut self, sql: &str) -> tiberius::Result<()> {
        self.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn run_statement(&mut self, statement: &Statement) -> tiberius::Result<()> {
        if statement.params.is_empty() {
            return self.batch(&statement.sql).await;
        }

        let mut query = Query::new(statement.sql.as_str());
        for param in &statement.params {
            match param {
                SqlValue::Text(value) => query.bind(value.as_str()),
                SqlValue::Timestamp(value) => query.bind(value.naive_utc()),
            }
        }
        query.execute(&mut self.client).await?;
        Ok(())
    }
}

impl Session for MssqlSession {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.batch(sql)
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))
        })
    }

    fn query<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let rows = self
                .client
                .simple_query(sql)
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))?
                .into_first_result()
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))?;

            rows.iter()
                .map(|row| {
                    (0..row.len())
                        .map(|i| row.try_get::<&str, _>(i).map(|v| v.map(str::to_string)))
                        .collect::<tiberius::Result<Row>>()
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
            self.batch("BEGIN TRANSACTION")
                .await
                .map_err(|e| TransactionError::control(format!("Failed to begin transaction: {}", e)))?;

            for (index, statement) in statements.iter().enumerate() {
                if let Err(e) = self.run_statement(statement).await {
                    // Severe errors abort the transaction server-side already
                    if let Err(rollback) = self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                        warn!("Failed to roll back transaction: {}", rollback);
                    }
                    return Err(TransactionError::at(index, e.to_string()));
                }
            }

            self.batch("COMMIT TRANSACTION")
                .await
                .map_err(|e| TransactionError::control(format!("Failed to commit transaction: {}", e)))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.client
                .close()
                .await
                .map_err(|e| MigrateError::Database(e.to_string()))
        })
    }
}

fn quote_ident(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}
