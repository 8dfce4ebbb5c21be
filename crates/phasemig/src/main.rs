mod cli;

use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

fn main() -> ExitCode {
    // Load .env before the config file so ${VAR} references resolve
    dotenvy::dotenv().ok();
    install_panic_hook();

    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| run(cli))) {
        Ok(outcome) => {
            if let Err(e) = &outcome {
                tracing::debug!("{:#}", e);
                eprintln!("{} {:#}", style("error:").red().bold(), e);
            }
            ExitCode::from(exit_code(&outcome))
        }
        // The hook already reported it
        Err(_) => ExitCode::FAILURE,
    }
}

fn run(cli: cli::Cli) -> Result<bool> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli.execute())
}

fn exit_code(outcome: &Result<bool>) -> u8 {
    match outcome {
        Ok(true) => 0,
        Ok(false) | Err(_) => 1,
    }
}

fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        tracing::error!("panic: {}", info);
        eprintln!("{} {}", style("fatal:").red().bold(), info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Ok(true)), 0);
        assert_eq!(exit_code(&Ok(false)), 1);
        assert_eq!(exit_code(&Err(anyhow::anyhow!("boom"))), 1);
    }
}
