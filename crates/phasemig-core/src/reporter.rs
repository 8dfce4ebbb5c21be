//! Progress reporting.
//!
//! The engine and orchestrator never print directly; they talk to an injected
//! [`Reporter`]. The CLI supplies a colored console implementation, library
//! users can route messages wherever they like.

/// Receives human-readable progress messages from a migration run.
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    fn error(&self, message: &str);

    /// A step finished successfully. Defaults to `info`.
    fn success(&self, message: &str) {
        self.info(message);
    }
}

/// Reporter that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}
