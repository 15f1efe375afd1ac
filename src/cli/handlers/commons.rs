// EN: src/cli/handlers/commons.rs

// Shared helpers for the action handlers: settings, paths, input and report printing.

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
};

use crate::{
    CancellationToken,
    core::{config::Settings, extensions::ExtensionRegistry, operations::Executor},
    models::{CommandState, ParseWarning, UnitReport},
    system::runner::RunnerError,
};

/// Expands `~` and `$VAR` in a user-supplied path and simplifies it for display.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .with_context(|| format!("Could not expand path '{}'", raw))?;
    Ok(dunce::simplified(Path::new(expanded.as_ref())).to_path_buf())
}

/// Expands a path and checks that it names an existing directory.
pub fn existing_dir(raw: &str) -> Result<PathBuf> {
    let path = expand_path(raw)?;
    if !path.is_dir() {
        return Err(anyhow!("'{}' is not an existing directory.", path.display()));
    }
    Ok(path)
}

/// Loads settings (defaults, file, environment) and applies the CLI flags last.
pub fn load_settings(
    config: Option<&str>,
    keep_backups: bool,
    poll: Option<f64>,
) -> Result<Settings> {
    let explicit = config.map(expand_path).transpose()?;
    let mut settings =
        Settings::load(explicit.as_deref()).context("Failed to load configuration")?;

    if keep_backups {
        settings.keep_backups = true;
    }
    if let Some(seconds) = poll {
        settings.poll_interval_seconds = seconds;
    }
    settings.validate().context("Invalid command-line option")?;
    log::debug!("Effective settings: {:?}", settings);
    Ok(settings)
}

/// Builds the executor with the built-in extensions registered.
pub fn build_executor(settings: Settings, token: &CancellationToken) -> Result<Executor> {
    Executor::new(
        settings,
        ExtensionRegistry::with_builtin_extensions(),
        token.clone(),
    )
    .context("Failed to prepare the command executor")
}

/// Reads a message from a file, or from stdin when `source` is `-`.
pub fn read_message(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read the message from stdin")?;
        return Ok(text);
    }
    let path = expand_path(source)?;
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read message file '{}'", path.display()))
}

/// Returns the interruption error if Ctrl+C was pressed, so the binary exits with 130.
pub fn check_for_cancellation(token: &CancellationToken) -> Result<()> {
    if token.load(Ordering::SeqCst) {
        return Err(RunnerError::Cancelled.into());
    }
    Ok(())
}

/// Starts a small runtime whose only task raises `token` on Ctrl+C.
///
/// External commands run in their own process group, so the terminal's SIGINT never
/// reaches them; raising the token is what makes the runner kill them. Listening
/// stops when the returned runtime is dropped.
pub fn listen_for_interrupt(token: &CancellationToken) -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let token = token.clone();
    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Interrupted, stopping.");
                token.store(true, Ordering::SeqCst);
            }
            Err(e) => log::warn!("Could not listen for Ctrl+C: {}", e),
        }
    });
    Ok(runtime)
}

/// Prints parse warnings, one per line.
pub fn print_warnings(warnings: &[ParseWarning]) {
    for warning in warnings {
        println!("  {} {}", "⚠".yellow(), warning.to_string().yellow());
    }
}

/// Prints a unit report: one line per command, then a summary.
pub fn print_report(report: &UnitReport) {
    if report.skipped {
        println!(
            "{} {}",
            report.message_id.cyan(),
            "already executed, skipped.".dimmed()
        );
        return;
    }

    println!("{}", report.message_id.cyan().bold());
    for outcome in &report.outcomes {
        let state = match outcome.state {
            CommandState::Done => outcome.state.to_string().green(),
            CommandState::Rejected => outcome.state.to_string().yellow(),
            CommandState::Failed => outcome.state.to_string().red(),
        };
        println!("  {:<8} /{} {}", state, outcome.command.name, outcome.detail.dimmed());
    }
    for command in &report.not_attempted {
        println!("  {:<8} /{} {}", "SKIPPED".dimmed(), command.name, "interrupted".dimmed());
    }
    print_warnings(&report.warnings);
    println!(
        "  {} done, {} rejected, {} failed",
        report.count(CommandState::Done),
        report.count(CommandState::Rejected),
        report.count(CommandState::Failed)
    );
}
