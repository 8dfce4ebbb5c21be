use console::style;
use phasemig_core::Reporter;

/// Colored progress output on the terminal.
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn info(&self, message: &str) {
        println!("  {} {}", style("→").dim(), message);
    }

    fn warn(&self, message: &str) {
        eprintln!("  {} {}", style("!").yellow().bold(), style(message).yellow());
    }

    fn error(&self, message: &str) {
        eprintln!("  {} {}", style("✗").red().bold(), style(message).red());
    }

    fn success(&self, message: &str) {
        println!("  {} {}", style("✓").green(), style(message).green());
    }
}
