// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use cellar::CookFailure;
use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Install { recipe, kitchen }) => commands::cmd_install(&recipe, &kitchen),
        Some(Commands::Test { recipe, kitchen }) => commands::cmd_test(&recipe, &kitchen),
        Some(Commands::Fetch { recipe, kitchen }) => commands::cmd_fetch(&recipe, &kitchen),
        Some(Commands::Resolve { recipe, kitchen }) => commands::cmd_resolve(&recipe, &kitchen),
        Some(Commands::Validate { recipe }) => commands::cmd_validate(&recipe),
        Some(Commands::Completions { shell }) => commands::cmd_completions(shell),
        None => {
            println!("Cellar - bottle-first package installer");
            println!("Run 'cellar --help' for usage information");
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            // Pipeline failures exit with a code naming the failed stage
            let code = e
                .downcast_ref::<CookFailure>()
                .map(CookFailure::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
