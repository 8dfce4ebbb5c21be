//! Three-phase deployments and one-off scripts.
//!
//! A scripts root is laid out as `<root>/<kind>/<phase>`, for example
//! `db/Postgres/Migrations`. Only the migrations phase is journaled; pre- and
//! post-deployment scripts run on every deployment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use phasemig_core::{
    DatabaseTarget, JournalTable, Reporter, Result, UpgradeError, UpgradeResult,
};
use tracing::{debug, info};

use crate::dialect::{dialect_for, Dialect};
use crate::engine::UpgradeEngine;
use crate::journal::{Journal, NullJournal, TableJournal};
use crate::scripts::FileSystemScriptSource;

/// Deployment phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreDeployment,
    Migrations,
    PostDeployment,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::PreDeployment, Phase::Migrations, Phase::PostDeployment];

    /// Folder holding this phase's scripts.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Phase::PreDeployment => "PreDeployment",
            Phase::Migrations => "Migrations",
            Phase::PostDeployment => "PostDeployment",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::PreDeployment => "PreDeployment",
            Phase::Migrations => "Migration",
            Phase::PostDeployment => "PostDeployment",
        }
    }

    /// Whether applied scripts are recorded so they only ever run once.
    pub fn tracks_journal(&self) -> bool {
        matches!(self, Phase::Migrations)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Per-phase results of one [`MigrationOrchestrator::migrate`] call.
///
/// Phases after a failed one never ran and have no entry.
#[derive(Debug, Default)]
pub struct MigrationReport {
    phases: Vec<(Phase, UpgradeResult)>,
}

impl MigrationReport {
    pub fn successful(&self) -> bool {
        self.phases.iter().all(|(_, result)| result.successful())
    }

    pub fn failed_phase(&self) -> Option<Phase> {
        self.phases
            .iter()
            .find(|(_, result)| !result.successful())
            .map(|(phase, _)| *phase)
    }

    pub fn phases(&self) -> &[(Phase, UpgradeResult)] {
        &self.phases
    }

    pub fn result(&self, phase: Phase) -> Option<&UpgradeResult> {
        self.phases.iter().find(|(p, _)| *p == phase).map(|(_, r)| r)
    }

    pub fn error(&self) -> Option<&UpgradeError> {
        self.phases.iter().find_map(|(_, result)| result.error())
    }

    pub fn scripts_executed(&self) -> usize {
        self.phases.iter().map(|(_, result)| result.scripts().len()).sum()
    }
}

/// Runs upgrade engines against one database target.
pub struct MigrationOrchestrator {
    dialect: Arc<dyn Dialect>,
    target: DatabaseTarget,
    journal_table: JournalTable,
    extension: String,
    connect_timeout: Duration,
    reporter: Arc<dyn Reporter>,
}

impl MigrationOrchestrator {
    /// Fails with a configuration error if the connection string cannot be
    /// understood by the target's dialect.
    pub fn new(target: DatabaseTarget, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let dialect = dialect_for(target.kind);
        Self::with_dialect(dialect, target, reporter)
    }

    pub fn with_dialect(
        dialect: Arc<dyn Dialect>,
        target: DatabaseTarget,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        dialect.validate_connection(&target.connection)?;
        Ok(Self {
            dialect,
            target,
            journal_table: JournalTable::default(),
            extension: "sql".to_string(),
            connect_timeout: Duration::from_secs(30),
            reporter,
        })
    }

    pub fn journal_table(mut self, table: JournalTable) -> Self {
        self.journal_table = table;
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `<root>/<kind>/<phase>`
    pub fn phase_dir(&self, root: &Path, phase: Phase) -> PathBuf {
        root.join(self.target.kind.as_str()).join(phase.dir_name())
    }

    /// Run PreDeployment, Migrations and PostDeployment in order, stopping
    /// at the first phase that fails.
    pub async fn migrate(&self, root: &Path) -> MigrationReport {
        info!(kind = %self.target.kind, root = %root.display(), "Starting migration");
        let mut report = MigrationReport::default();

        for phase in Phase::ALL {
            self.reporter.info(&format!("Executing {} Scripts...", phase.label()));

            let source = FileSystemScriptSource::new(self.phase_dir(root, phase)).extension(self.extension.as_str());
            let result = if phase.tracks_journal() {
                let journal = TableJournal::new(self.dialect.as_ref(), self.journal_table.clone());
                self.execute(source, journal).await
            } else {
                self.execute(source, NullJournal).await
            };

            let successful = self.report(&result);
            debug!(phase = %phase, scripts = result.scripts().len(), successful, "Phase finished");
            report.phases.push((phase, result));
            if !successful {
                break;
            }
        }

        report
    }

    /// Run the script (or every script under the directory) at `path` once,
    /// without journaling.
    pub async fn run_script(&self, path: &Path) -> UpgradeResult {
        self.reporter
            .info(&format!("Running Database Script For {}", self.target.kind));
        self.reporter.info("Executing Database Script...");

        let source = FileSystemScriptSource::new(path).extension(self.extension.as_str());
        let result = self.execute(source, NullJournal).await;
        self.report(&result);
        result
    }

    async fn execute(&self, source: FileSystemScriptSource, journal: impl Journal + 'static) -> UpgradeResult {
        let engine = UpgradeEngine::builder()
            .dialect(self.dialect.clone())
            .target(self.target.clone())
            .source(source)
            .journal(journal)
            .reporter(self.reporter.clone())
            .connect_timeout(self.connect_timeout)
            .build();

        match engine {
            Ok(mut engine) => engine.perform_upgrade().await,
            Err(e) => UpgradeResult::failure(Vec::new(), UpgradeError::new(None, e)),
        }
    }

    fn report(&self, result: &UpgradeResult) -> bool {
        match result.error() {
            None => {
                self.reporter.success("Success!");
                true
            }
            Some(error) => {
                self.reporter.error(&error.to_string());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Level, MockDatabase, MockDialect, RecordingReporter};
    use phasemig_core::DatabaseKind;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, sql: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, sql).unwrap();
    }

    fn orchestrator(db: &MockDatabase, reporter: Arc<RecordingReporter>) -> MigrationOrchestrator {
        let target = DatabaseTarget::new(DatabaseKind::Postgres, "mock://db").unwrap();
        MigrationOrchestrator::with_dialect(Arc::new(MockDialect::new(db.clone())), target, reporter).unwrap()
    }

    #[test]
    fn test_phase_dirs() {
        let db = MockDatabase::new();
        let orchestrator = orchestrator(&db, RecordingReporter::new());
        assert_eq!(
            orchestrator.phase_dir(Path::new("db"), Phase::Migrations),
            Path::new("db").join("Postgres").join("Migrations")
        );
        assert!(Phase::Migrations.tracks_journal());
        assert!(!Phase::PreDeployment.tracks_journal());
        assert!(!Phase::PostDeployment.tracks_journal());
    }

    #[test]
    fn test_invalid_connection_rejected_up_front() {
        let target = DatabaseTarget::new(DatabaseKind::Postgres, "Host=x;Nope=1").unwrap();
        let err = MigrationOrchestrator::new(target, RecordingReporter::new()).err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_migrate_runs_phases_in_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Postgres/PreDeployment/pre.sql", "SELECT 'pre'");
        write(dir.path(), "Postgres/Migrations/0001/init.sql", "SELECT 'm1'");
        write(dir.path(), "Postgres/Migrations/0002/next.sql", "SELECT 'm2'");
        write(dir.path(), "Postgres/PostDeployment/post.sql", "SELECT 'post'");
        write(dir.path(), "MySQL/Migrations/other.sql", "SELECT 'wrong engine'");

        let db = MockDatabase::new();
        let reporter = RecordingReporter::new();
        let report = orchestrator(&db, reporter.clone()).migrate(dir.path()).await;

        assert!(report.successful());
        assert_eq!(report.phases().len(), 3);
        assert_eq!(report.scripts_executed(), 4);
        assert_eq!(
            db.committed(),
            vec!["SELECT 'pre'", "SELECT 'm1'", "SELECT 'm2'", "SELECT 'post'"]
        );
        assert_eq!(db.journal_names(), vec!["0001/init.sql", "0002/next.sql"]);
        assert_eq!(reporter.at(Level::Success), vec!["Success!", "Success!", "Success!"]);
        assert_eq!(
            reporter
                .at(Level::Info)
                .into_iter()
                .filter(|m| m.ends_with("Scripts..."))
                .collect::<Vec<_>>(),
            vec![
                "Executing PreDeployment Scripts...",
                "Executing Migration Scripts...",
                "Executing PostDeployment Scripts...",
            ]
        );
    }

    #[tokio::test]
    async fn test_rerun_only_repeats_untracked_phases() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Postgres/PreDeployment/pre.sql", "SELECT 'pre'");
        write(dir.path(), "Postgres/Migrations/0001.sql", "SELECT 'm1'");
        write(dir.path(), "Postgres/PostDeployment/post.sql", "SELECT 'post'");

        let db = MockDatabase::new();
        let orchestrator = orchestrator(&db, RecordingReporter::new());
        assert!(orchestrator.migrate(dir.path()).await.successful());

        let second = orchestrator.migrate(dir.path()).await;
        assert!(second.successful());
        assert!(second.result(Phase::Migrations).unwrap().scripts().is_empty());
        assert_eq!(second.result(Phase::PreDeployment).unwrap().scripts().len(), 1);
        assert_eq!(second.result(Phase::PostDeployment).unwrap().scripts().len(), 1);
        assert_eq!(
            db.committed(),
            vec!["SELECT 'pre'", "SELECT 'm1'", "SELECT 'post'", "SELECT 'pre'", "SELECT 'post'"]
        );
    }

    #[tokio::test]
    async fn test_failed_phase_stops_later_phases() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Postgres/PreDeployment/pre.sql", "SELECT 'pre'");
        write(dir.path(), "Postgres/Migrations/0001.sql", "SELECT 'm1'");
        write(dir.path(), "Postgres/Migrations/0002.sql", "FAIL");
        write(dir.path(), "Postgres/Migrations/0003.sql", "SELECT 'm3'");
        write(dir.path(), "Postgres/PostDeployment/post.sql", "SELECT 'post'");

        let db = MockDatabase::new();
        let reporter = RecordingReporter::new();
        let report = orchestrator(&db, reporter.clone()).migrate(dir.path()).await;

        assert!(!report.successful());
        assert_eq!(report.failed_phase(), Some(Phase::Migrations));
        assert!(report.result(Phase::PostDeployment).is_none());
        assert_eq!(report.error().unwrap().script.as_deref(), Some("0002.sql"));

        // PreDeployment and the first migration stay committed
        assert_eq!(db.committed(), vec!["SELECT 'pre'", "SELECT 'm1'"]);
        assert_eq!(db.journal_names(), vec!["0001.sql"]);
        assert!(!db.executed().iter().any(|sql| sql.contains("'post'") || sql.contains("'m3'")));

        let errors = reporter.at(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Script '0002.sql' failed"));
    }

    #[tokio::test]
    async fn test_failed_predeployment_skips_migrations_and_post() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Postgres/PreDeployment/pre.sql", "SELECT 'pre';\nFAIL;");
        write(dir.path(), "Postgres/Migrations/0001.sql", "SELECT 'm1'");
        write(dir.path(), "Postgres/PostDeployment/post.sql", "SELECT 'post'");

        let db = MockDatabase::new();
        let report = orchestrator(&db, RecordingReporter::new()).migrate(dir.path()).await;

        assert!(!report.successful());
        assert_eq!(report.failed_phase(), Some(Phase::PreDeployment));
        assert_eq!(report.phases().len(), 1);
        assert_eq!(report.error().unwrap().script.as_deref(), Some("pre.sql"));

        assert!(db.committed().is_empty());
        assert!(!db.executed().iter().any(|sql| sql.contains("'m1'") || sql.contains("'post'")));
        assert!(!db.journal_created());
        assert_eq!(db.connects(), 1);
    }

    #[tokio::test]
    async fn test_migrate_over_journal_without_checksums() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Postgres/Migrations/0001.sql", "CREATE TABLE one (id INT)");
        write(dir.path(), "Postgres/Migrations/0002.sql", "CREATE TABLE two (id INT)");

        let db = MockDatabase::new();
        db.seed_legacy_journal("0001.sql");

        let report = orchestrator(&db, RecordingReporter::new()).migrate(dir.path()).await;
        assert!(report.successful(), "{:?}", report.error());
        assert_eq!(db.committed(), vec!["CREATE TABLE two (id INT)"]);
        assert_eq!(db.journal_names(), vec!["0001.sql", "0002.sql"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_an_empty_success() {
        let dir = TempDir::new().unwrap();
        let db = MockDatabase::new();
        db.fail_connections(true);
        let reporter = RecordingReporter::new();

        let report = orchestrator(&db, reporter.clone())
            .migrate(&dir.path().join("nowhere"))
            .await;

        assert!(report.successful());
        assert_eq!(report.scripts_executed(), 0);
        assert_eq!(db.connects(), 0);
        assert_eq!(reporter.at(Level::Warn).len(), 3);
    }

    #[tokio::test]
    async fn test_run_script_is_untracked() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "seed.sql", "INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);");

        let db = MockDatabase::new();
        let reporter = RecordingReporter::new();
        let orchestrator = orchestrator(&db, reporter.clone());

        for _ in 0..2 {
            let result = orchestrator.run_script(&dir.path().join("seed.sql")).await;
            assert!(result.successful());
            assert_eq!(result.scripts()[0].name, "seed.sql");
        }
        assert_eq!(db.committed().len(), 4);
        assert!(!db.journal_created());
        assert_eq!(reporter.at(Level::Info)[0], "Running Database Script For Postgres");
    }

    #[tokio::test]
    async fn test_run_script_failure() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.sql", "SELECT 1;\nFAIL;");

        let db = MockDatabase::new();
        let result = orchestrator(&db, RecordingReporter::new())
            .run_script(&dir.path().join("bad.sql"))
            .await;
        assert!(!result.successful());
        assert!(db.committed().is_empty());
    }
}
