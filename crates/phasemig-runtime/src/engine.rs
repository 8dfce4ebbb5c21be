//! The upgrade engine: discover, filter, execute.
//!
//! One engine run walks `Idle -> Discovering -> Filtering -> Executing` and
//! ends in `Succeeded` or `Failed`. Scripts run strictly one after another,
//! each in its own transaction together with its journal record. The first
//! failure stops the run; scripts committed before it stay committed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use phasemig_core::{
    DatabaseTarget, JournalEntry, MigrateError, Reporter, Result, Script, TracingReporter, UpgradeError,
    UpgradeResult,
};
use tracing::{debug, warn};

use crate::dialect::{dialect_for, Dialect, Session, Statement};
use crate::journal::{has_been_applied, Journal};
use crate::scripts::ScriptSource;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an engine run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Discovering,
    Filtering,
    Executing,
    Succeeded,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Discovering => "discovering",
            EngineState::Filtering => "filtering",
            EngineState::Executing => "executing",
            EngineState::Succeeded => "succeeded",
            EngineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Applies pending scripts from one source to one database.
pub struct UpgradeEngine {
    dialect: Arc<dyn Dialect>,
    target: DatabaseTarget,
    source: Box<dyn ScriptSource>,
    journal: Box<dyn Journal>,
    reporter: Arc<dyn Reporter>,
    connect_timeout: Duration,
    state: EngineState,
}

impl UpgradeEngine {
    pub fn builder() -> UpgradeEngineBuilder {
        UpgradeEngineBuilder::default()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run the upgrade. Never returns `Err`: every failure is carried in the
    /// returned [`UpgradeResult`].
    pub async fn perform_upgrade(&mut self) -> UpgradeResult {
        self.transition(EngineState::Discovering);

        if !self.source.exists() {
            self.reporter.warn(&format!(
                "Script path '{}' does not exist, no scripts will be run",
                self.source.describe()
            ));
        }

        let scripts = match self.source.scripts() {
            Ok(scripts) => scripts,
            Err(e) => return self.fail(Vec::new(), None, e),
        };
        if let Some(name) = first_duplicate(&scripts) {
            let e = MigrateError::Discovery(format!("Duplicate script name '{}'", name));
            return self.fail(Vec::new(), None, e);
        }
        debug!("Discovered {} script(s) in {}", scripts.len(), self.source.describe());

        self.transition(EngineState::Filtering);
        if scripts.is_empty() {
            self.reporter.info("No new scripts need to be executed");
            return self.succeed(Vec::new());
        }

        let mut session = match self.connect().await {
            Ok(session) => session,
            Err(e) => return self.fail(Vec::new(), None, e),
        };

        let result = self.run(session.as_mut(), scripts).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close connection: {}", e);
        }
        result
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        debug!("Connecting to {} database", self.target.kind);
        match tokio::time::timeout(self.connect_timeout, self.dialect.connect(&self.target.connection)).await {
            Ok(result) => result,
            Err(_) => Err(MigrateError::Database(format!(
                "Timed out after {}s connecting to {} database",
                self.connect_timeout.as_secs(),
                self.target.kind
            ))),
        }
    }

    async fn run(&mut self, session: &mut dyn Session, scripts: Vec<Script>) -> UpgradeResult {
        if let Err(e) = self.journal.ensure_exists(&mut *session).await {
            return self.fail(Vec::new(), None, e);
        }
        let applied = match self.journal.applied_scripts(&mut *session).await {
            Ok(applied) => applied,
            Err(e) => return self.fail(Vec::new(), None, e),
        };

        self.report_drift(&scripts, &applied);

        let pending: Vec<Script> = scripts
            .into_iter()
            .filter(|s| !has_been_applied(&applied, &s.name))
            .collect();
        if pending.is_empty() {
            self.reporter.info("No new scripts need to be executed");
            return self.succeed(Vec::new());
        }

        self.transition(EngineState::Executing);
        let mut executed = Vec::with_capacity(pending.len());

        for script in pending {
            self.reporter.info(&format!("Executing script '{}'", script.name));

            let mut statements: Vec<Statement> = self
                .dialect
                .split_batches(&script.contents)
                .into_iter()
                .map(Statement::raw)
                .collect();
            let batches = statements.len();
            statements.extend(self.journal.record_applied(&script, Utc::now()));

            if let Err(e) = session.run_in_transaction(&statements).await {
                let source = match e.statement {
                    Some(index) if index >= batches => MigrateError::Journal(format!(
                        "Failed to record '{}' as applied: {}",
                        script.name, e.message
                    )),
                    _ => MigrateError::ScriptExecution {
                        script: script.name.clone(),
                        message: e.to_string(),
                    },
                };
                return self.fail(executed, Some(script.name), source);
            }

            debug!("Applied {} ({} batch(es))", script.name, batches);
            executed.push(script);
        }

        self.succeed(executed)
    }

    fn report_drift(&self, scripts: &[Script], applied: &[JournalEntry]) {
        for script in scripts {
            let changed = applied.iter().any(|entry| {
                entry.script_name == script.name
                    && entry.checksum.as_deref().is_some_and(|c| c != script.checksum)
            });
            if changed {
                self.reporter.warn(&format!(
                    "Script '{}' has changed since it was applied and will not be run again",
                    script.name
                ));
            }
        }
    }

    fn transition(&mut self, next: EngineState) {
        debug!(from = %self.state, to = %next, "Upgrade engine state change");
        self.state = next;
    }

    fn succeed(&mut self, scripts: Vec<Script>) -> UpgradeResult {
        self.transition(EngineState::Succeeded);
        UpgradeResult::success(scripts)
    }

    fn fail(&mut self, scripts: Vec<Script>, script: Option<String>, source: MigrateError) -> UpgradeResult {
        self.transition(EngineState::Failed);
        UpgradeResult::failure(scripts, UpgradeError::new(script, source))
    }
}

fn first_duplicate(scripts: &[Script]) -> Option<&str> {
    let mut seen = HashSet::new();
    scripts
        .iter()
        .map(|s| s.name.as_str())
        .find(|name| !seen.insert(*name))
}

/// Builder for [`UpgradeEngine`].
///
/// `target`, `source` and `journal` are required. The dialect defaults to the
/// one for the target's kind, the reporter to [`TracingReporter`].
#[derive(Default)]
pub struct UpgradeEngineBuilder {
    dialect: Option<Arc<dyn Dialect>>,
    target: Option<DatabaseTarget>,
    source: Option<Box<dyn ScriptSource>>,
    journal: Option<Box<dyn Journal>>,
    reporter: Option<Arc<dyn Reporter>>,
    connect_timeout: Option<Duration>,
}

impl UpgradeEngineBuilder {
    pub fn dialect(mut self, dialect: Arc<dyn Dialect>) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn target(mut self, target: DatabaseTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn source(mut self, source: impl ScriptSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn journal(mut self, journal: impl Journal + 'static) -> Self {
        self.journal = Some(Box::new(journal));
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<UpgradeEngine> {
        let target = self
            .target
            .ok_or_else(|| MigrateError::Configuration("Upgrade engine needs a database target".into()))?;
        let source = self
            .source
            .ok_or_else(|| MigrateError::Configuration("Upgrade engine needs a script source".into()))?;
        let journal = self
            .journal
            .ok_or_else(|| MigrateError::Configuration("Upgrade engine needs a journal".into()))?;
        let dialect = self.dialect.unwrap_or_else(|| dialect_for(target.kind));
        dialect.validate_connection(&target.connection)?;

        Ok(UpgradeEngine {
            dialect,
            target,
            source,
            journal,
            reporter: self.reporter.unwrap_or_else(|| Arc::new(TracingReporter)),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            state: EngineState::Idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{NullJournal, TableJournal};
    use crate::testing::{Level, MockDatabase, MockDialect, RecordingReporter};
    use phasemig_core::{DatabaseKind, JournalTable};

    fn target() -> DatabaseTarget {
        DatabaseTarget::new(DatabaseKind::Postgres, "mock://db").unwrap()
    }

    fn engine(db: &MockDatabase, scripts: Vec<Script>, tracked: bool, reporter: Arc<RecordingReporter>) -> UpgradeEngine {
        let dialect = Arc::new(MockDialect::new(db.clone()));
        let builder = UpgradeEngine::builder()
            .dialect(dialect.clone())
            .target(target())
            .source(scripts)
            .reporter(reporter);
        let builder = if tracked {
            builder.journal(TableJournal::new(dialect.as_ref(), JournalTable::default()))
        } else {
            builder.journal(NullJournal)
        };
        builder.build().unwrap()
    }

    fn names(result: &UpgradeResult) -> Vec<&str> {
        result.scripts().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_builder_requires_parts() {
        let err = UpgradeEngine::builder().target(target()).build().err().unwrap();
        assert!(err.is_configuration());

        let err = UpgradeEngine::builder()
            .source(Vec::<Script>::new())
            .journal(NullJournal)
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_builder_validates_connection() {
        let target = DatabaseTarget::new(DatabaseKind::Postgres, "Host=x;Bogus=1").unwrap();
        let err = UpgradeEngine::builder()
            .target(target)
            .source(Vec::<Script>::new())
            .journal(NullJournal)
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_applies_scripts_in_name_order() {
        let db = MockDatabase::new();
        let reporter = RecordingReporter::new();
        let scripts = vec![
            Script::new("b.sql", "CREATE TABLE b (id INT)"),
            Script::new("a.sql", "CREATE TABLE a (id INT)"),
            Script::new("c.sql", "CREATE TABLE c (id INT)"),
        ];
        let mut engine = engine(&db, scripts, true, reporter.clone());
        assert_eq!(engine.state(), EngineState::Idle);

        let result = engine.perform_upgrade().await;
        assert!(result.successful());
        assert_eq!(engine.state(), EngineState::Succeeded);
        assert_eq!(names(&result), vec!["a.sql", "b.sql", "c.sql"]);
        assert_eq!(
            db.committed(),
            vec!["CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)", "CREATE TABLE c (id INT)"]
        );
        assert_eq!(db.journal_names(), vec!["a.sql", "b.sql", "c.sql"]);
        assert_eq!(
            reporter.at(Level::Info),
            vec!["Executing script 'a.sql'", "Executing script 'b.sql'", "Executing script 'c.sql'"]
        );
        assert_eq!(db.connects(), 1);
        assert_eq!(db.closes(), 1);
    }

    #[tokio::test]
    async fn test_second_run_executes_nothing() {
        let db = MockDatabase::new();
        let scripts = vec![Script::new("a.sql", "SELECT 1"), Script::new("b.sql", "SELECT 2")];

        let first = engine(&db, scripts.clone(), true, RecordingReporter::new())
            .perform_upgrade()
            .await;
        assert_eq!(first.scripts().len(), 2);

        let reporter = RecordingReporter::new();
        let second = engine(&db, scripts, true, reporter.clone()).perform_upgrade().await;
        assert!(second.successful());
        assert!(second.scripts().is_empty());
        assert_eq!(db.committed(), vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(reporter.at(Level::Info), vec!["No new scripts need to be executed"]);
    }

    #[tokio::test]
    async fn test_only_new_scripts_run() {
        let db = MockDatabase::new();
        engine(&db, vec![Script::new("a.sql", "SELECT 1")], true, RecordingReporter::new())
            .perform_upgrade()
            .await;

        let scripts = vec![Script::new("a.sql", "SELECT 1"), Script::new("b.sql", "SELECT 2")];
        let result = engine(&db, scripts, true, RecordingReporter::new())
            .perform_upgrade()
            .await;
        assert_eq!(names(&result), vec!["b.sql"]);
    }

    #[tokio::test]
    async fn test_failing_script_rolls_back_and_stops() {
        let db = MockDatabase::new();
        let scripts = vec![
            Script::new("a.sql", "INSERT INTO t VALUES (1);"),
            Script::new("b.sql", "INSERT INTO t VALUES (2);\nFAIL HERE;"),
            Script::new("c.sql", "INSERT INTO t VALUES (3);"),
        ];
        let mut engine = engine(&db, scripts, true, RecordingReporter::new());

        let result = engine.perform_upgrade().await;
        assert!(!result.successful());
        assert_eq!(engine.state(), EngineState::Failed);
        assert_eq!(names(&result), vec!["a.sql"]);

        let error = result.error().unwrap();
        assert_eq!(error.script.as_deref(), Some("b.sql"));
        assert!(matches!(&error.source, MigrateError::ScriptExecution { script, .. } if script == "b.sql"));
        assert!(error.to_string().contains("statement 2 failed"));

        // b's first insert was rolled back with it, c never ran
        assert_eq!(db.committed(), vec!["INSERT INTO t VALUES (1)"]);
        assert_eq!(db.journal_names(), vec!["a.sql"]);
        assert!(!db.executed().iter().any(|sql| sql.contains("VALUES (3)")));
        assert_eq!(db.rollbacks(), 1);
        assert_eq!(db.closes(), 1);
    }

    #[tokio::test]
    async fn test_journal_write_failure_rolls_back_script() {
        let db = MockDatabase::new();
        db.fail_journal_writes(true);

        let result = engine(&db, vec![Script::new("a.sql", "SELECT 1")], true, RecordingReporter::new())
            .perform_upgrade()
            .await;
        assert!(!result.successful());
        assert!(matches!(result.error().unwrap().source, MigrateError::Journal(_)));
        assert!(db.committed().is_empty());
        assert!(db.journal_names().is_empty());
    }

    #[tokio::test]
    async fn test_empty_source_succeeds_without_connecting() {
        let db = MockDatabase::new();
        db.fail_connections(true);

        let reporter = RecordingReporter::new();
        let result = engine(&db, Vec::new(), true, reporter.clone()).perform_upgrade().await;
        assert!(result.successful());
        assert!(result.scripts().is_empty());
        assert_eq!(db.connects(), 0);
        assert_eq!(reporter.at(Level::Info), vec!["No new scripts need to be executed"]);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported() {
        let db = MockDatabase::new();
        db.fail_connections(true);

        let mut engine = engine(&db, vec![Script::new("a.sql", "SELECT 1")], true, RecordingReporter::new());
        let result = engine.perform_upgrade().await;
        assert!(!result.successful());
        assert_eq!(engine.state(), EngineState::Failed);
        let error = result.error().unwrap();
        assert!(error.script.is_none());
        assert!(matches!(error.source, MigrateError::Database(_)));
    }

    #[tokio::test]
    async fn test_null_journal_reruns_everything() {
        let db = MockDatabase::new();
        let scripts = vec![Script::new("a.sql", "SELECT 1")];

        for _ in 0..2 {
            let result = engine(&db, scripts.clone(), false, RecordingReporter::new())
                .perform_upgrade()
                .await;
            assert_eq!(names(&result), vec!["a.sql"]);
        }
        assert_eq!(db.committed(), vec!["SELECT 1", "SELECT 1"]);
        assert!(!db.journal_created());
    }

    #[tokio::test]
    async fn test_checksum_drift_warns_without_rerun() {
        let db = MockDatabase::new();
        db.seed_journal("a.sql", Some("0000"));
        db.seed_journal("b.sql", None);

        let reporter = RecordingReporter::new();
        let scripts = vec![Script::new("a.sql", "SELECT 1"), Script::new("b.sql", "SELECT 2")];
        let result = engine(&db, scripts, true, reporter.clone()).perform_upgrade().await;

        assert!(result.successful());
        assert!(result.scripts().is_empty());
        let warnings = reporter.at(Level::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'a.sql' has changed"));
    }

    #[tokio::test]
    async fn test_upgrades_journal_without_checksum_column() {
        let db = MockDatabase::new();
        db.seed_legacy_journal("0001.sql");
        assert!(!db.has_checksum_column());

        let scripts = vec![
            Script::new("0001.sql", "CREATE TABLE one (id INT)"),
            Script::new("0002.sql", "CREATE TABLE two (id INT)"),
        ];
        let reporter = RecordingReporter::new();
        let result = engine(&db, scripts, true, reporter.clone()).perform_upgrade().await;

        assert!(result.successful(), "{:?}", result.error());
        assert_eq!(names(&result), vec!["0002.sql"]);
        assert!(db.has_checksum_column());
        assert_eq!(db.committed(), vec!["CREATE TABLE two (id INT)"]);
        assert_eq!(db.journal_names(), vec!["0001.sql", "0002.sql"]);
        assert!(reporter.at(Level::Warn).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_fail_discovery() {
        let db = MockDatabase::new();
        let scripts = vec![Script::new("a.sql", "SELECT 1"), Script::new("a.sql", "SELECT 2")];

        let result = engine(&db, scripts, true, RecordingReporter::new()).perform_upgrade().await;
        assert!(matches!(result.error().unwrap().source, MigrateError::Discovery(_)));
        assert_eq!(db.connects(), 0);
    }
}
