// EN: src/cli/handlers/watch.rs

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use crate::{
    CancellationToken,
    cli::{args::WatchArgs, handlers::commons},
    constants::DEFAULT_CONVERSATIONS_DIR,
    core::ledger::Ledger,
    system::{
        queue::Worker,
        watcher::{ConversationWatcher, WatchOptions},
    },
};

/// Entry point for `filegenie watch`.
///
/// Runs until Ctrl+C: the watcher polls on a tokio runtime and feeds the single
/// worker thread; reports are printed as units finish.
pub fn handle(args: Vec<String>, token: &CancellationToken) -> Result<()> {
    let watch_args = WatchArgs::try_parse_from(&args)?;

    // 1. Settings and locations.
    let settings = commons::load_settings(
        watch_args.config.as_deref(),
        watch_args.keep_backups,
        watch_args.poll,
    )?;
    let folder = match &watch_args.folder {
        Some(raw) => commons::existing_dir(raw)?,
        None => default_conversations_folder()?,
    };
    let conversation = match &watch_args.conv {
        Some(raw) => {
            let path = commons::expand_path(raw)?;
            if !path.is_file() {
                return Err(anyhow!("Conversation file '{}' does not exist.", path.display()));
            }
            Some(path)
        }
        None => None,
    };
    let workspace = match &watch_args.workspace {
        Some(raw) => commons::existing_dir(raw)?,
        None => std::env::current_dir().context("Failed to read the current directory")?,
    };

    // 2. The ledger is loaded once, before the worker takes its first unit.
    let ledger = Ledger::load(&Ledger::default_path(&folder))?;
    log::info!(
        "Ledger '{}' loaded with {} entries.",
        ledger.path().display(),
        ledger.len()
    );

    let executor = commons::build_executor(settings.clone(), token)?;
    let (report_tx, mut report_rx) = tokio::sync::mpsc::unbounded_channel();
    let (queue, worker) = Worker::spawn(executor, ledger, Some(report_tx))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let printer = runtime.spawn(async move {
        while let Some(report) = report_rx.recv().await {
            commons::print_report(&report);
        }
    });

    println!(
        "{} {} {}",
        "Watching".green().bold(),
        conversation.as_ref().unwrap_or(&folder).display(),
        "(Ctrl+C to stop)".dimmed()
    );
    let watcher = ConversationWatcher::new(WatchOptions {
        folder,
        conversation,
        workspace,
        poll_interval: settings.poll_interval(),
    });

    // 3. Poll until interrupted, then drain the worker and the report printer.
    runtime.block_on(watcher.run(queue, token.clone()));
    let ledger = worker.join()?;
    if let Err(e) = runtime.block_on(printer) {
        log::debug!("Report printer ended abnormally: {}", e);
    }
    log::info!("Stopped with {} ledger entries.", ledger.len());

    commons::check_for_cancellation(token)
}

fn default_conversations_folder() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine the home directory."))?;
    let folder = home.join(DEFAULT_CONVERSATIONS_DIR);
    if !folder.is_dir() {
        return Err(anyhow!(
            "Conversations folder '{}' does not exist. Use --folder to choose one.",
            folder.display()
        ));
    }
    Ok(folder)
}
