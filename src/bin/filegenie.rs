// EN: src/bin/filegenie.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use colored::*;
use filegenie::{
    CancellationToken,
    cli::{Cli, handlers},
    system::runner::RunnerError,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

// --- Command Definition and Registry ---

/// A CLI action, its aliases, and its synchronous handler function.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, &CancellationToken) -> Result<()>,
}

/// Every CLI action. To add one, add an entry here and a module under `cli/handlers`.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "backups",
        aliases: &["bak"],
        handler: handlers::backups::handle,
    },
    CommandDefinition {
        name: "parse",
        aliases: &["check"],
        handler: handlers::parse::handle,
    },
    CommandDefinition {
        name: "run",
        aliases: &["exec"],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "watch",
        aliases: &["w"],
        handler: handlers::watch::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

/// Sets up logging, parses arguments, dispatches to the handler and handles errors
/// in one place.
fn main() {
    let cancellation_token = Arc::new(AtomicBool::new(false));
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run_cli(Cli::parse(), cancellation_token) {
        // Ctrl+C: exit quietly with the conventional interruption code.
        if let Some(RunnerError::Cancelled) = e.downcast_ref::<RunnerError>() {
            std::process::exit(130);
        }

        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli, cancellation_token: CancellationToken) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let Some(action) = cli.action else {
        println!("Nothing to do. Try `filegenie --help`.");
        return Ok(());
    };

    let command = find_command(&action).ok_or_else(|| {
        let known: Vec<&str> = COMMAND_REGISTRY.iter().map(|c| c.name).collect();
        anyhow!(
            "Unknown action '{}'. Available actions: {}.",
            action.yellow(),
            known.join(", ")
        )
    })?;
    (command.handler)(cli.args, &cancellation_token)
}
