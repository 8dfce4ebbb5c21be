use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::style;
use phasemig_core::{DatabaseConfig, DatabaseKind, DatabaseTarget, PhasemigConfig};
use phasemig_runtime::MigrationOrchestrator;
use tracing::info;

use super::prompt::{Prompter, TerminalPrompter};
use super::reporter::ConsoleReporter;

/// Database commands.
#[derive(Parser)]
pub struct DatabaseCommand {
    #[command(subcommand)]
    pub action: DatabaseAction,
}

#[derive(Subcommand)]
pub enum DatabaseAction {
    /// Run PreDeployment, Migrations and PostDeployment scripts.
    Migrate(MigrateArgs),

    /// Run a single database script (or every script in a directory) once.
    Run(RunArgs),
}

/// Where to connect.
#[derive(Args)]
pub struct TargetArgs {
    /// Database type: MSSQL, MySQL or Postgres [default: MSSQL].
    #[arg(short = 't', long = "type", value_name = "type")]
    pub kind: Option<DatabaseKind>,

    /// Connection string.
    #[arg(short, long, value_name = "string")]
    pub connection: Option<String>,
}

#[derive(Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Path to the scripts root (contains <type>/<phase> folders).
    #[arg(short, long, value_name = "path")]
    pub scripts: Option<PathBuf>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Path to the database script.
    #[arg(short, long, value_name = "path")]
    pub script: Option<PathBuf>,
}

impl DatabaseCommand {
    pub async fn execute(self, config: &PhasemigConfig) -> Result<bool> {
        let prompter = TerminalPrompter;
        match self.action {
            DatabaseAction::Migrate(args) => migrate(args, config, &prompter).await,
            DatabaseAction::Run(args) => run(args, config, &prompter).await,
        }
    }
}

async fn migrate(args: MigrateArgs, config: &PhasemigConfig, prompter: &dyn Prompter) -> Result<bool> {
    let target = resolve_target(&args.target, &config.database, prompter)?;
    let root = match args.scripts.or_else(|| config.scripts.root.clone()) {
        Some(root) => root,
        None => PathBuf::from(prompter.ask("Scripts Path")?),
    };

    print_header("Database Migrations", target.kind);
    let orchestrator = orchestrator(target, config)?;
    let report = orchestrator.migrate(&root).await;
    info!(
        successful = report.successful(),
        scripts = report.scripts_executed(),
        "Migration finished"
    );
    Ok(report.successful())
}

async fn run(args: RunArgs, config: &PhasemigConfig, prompter: &dyn Prompter) -> Result<bool> {
    let target = resolve_target(&args.target, &config.database, prompter)?;
    let script = match args.script {
        Some(script) => script,
        None => PathBuf::from(prompter.ask("Script Path")?),
    };

    print_header("Database Script", target.kind);
    let orchestrator = orchestrator(target, config)?;
    let result = orchestrator.run_script(&script).await;
    info!(
        successful = result.successful(),
        scripts = result.scripts().len(),
        "Script run finished"
    );
    Ok(result.successful())
}

fn orchestrator(target: DatabaseTarget, config: &PhasemigConfig) -> Result<MigrationOrchestrator> {
    let orchestrator = MigrationOrchestrator::new(target, Arc::new(ConsoleReporter))?
        .journal_table(config.journal.clone())
        .extension(config.scripts.extension.as_str())
        .connect_timeout(config.database.connect_timeout());
    Ok(orchestrator)
}

/// CLI flag, then config file, then prompt. The type falls back to MSSQL.
fn resolve_target(args: &TargetArgs, config: &DatabaseConfig, prompter: &dyn Prompter) -> Result<DatabaseTarget> {
    let kind = args.kind.or(config.kind).unwrap_or(DatabaseKind::Mssql);
    let connection = match args.connection.clone().or_else(|| config.connection.clone()) {
        Some(connection) => connection,
        None => prompter.ask("Connection String")?,
    };
    Ok(DatabaseTarget::new(kind, connection)?)
}

fn print_header(title: &str, kind: DatabaseKind) {
    println!();
    println!(
        "  {}  {} ({})",
        style("phasemig").bold().cyan(),
        style(title).bold(),
        kind
    );
    println!();
}
