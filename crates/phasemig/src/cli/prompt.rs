use std::io::IsTerminal;

use anyhow::Result;
use dialoguer::Input;
use phasemig_core::MigrateError;

/// Asks the user for a value that was neither passed nor configured.
pub trait Prompter {
    fn ask(&self, label: &str) -> Result<String>;
}

/// Interactive prompt on the terminal. Refuses when stdin is not a TTY
/// (CI, pipes) instead of blocking.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, label: &str) -> Result<String> {
        if !std::io::stdin().is_terminal() {
            return Err(MigrateError::Configuration(format!(
                "{} is required: pass it as an option or set it in the config file",
                label
            ))
            .into());
        }

        let value: String = Input::new().with_prompt(label).interact_text()?;
        Ok(value.trim().to_string())
    }
}
