// EN: src/cli/handlers/run.rs

use anyhow::{Result, anyhow};
use clap::Parser;
use std::path::Path;

use crate::{
    CancellationToken,
    cli::{args::RunArgs, handlers::commons},
    core::ledger::Ledger,
    models::{CommandState, MessageUnit},
    system::queue::Worker,
};

/// Entry point for `filegenie run`: executes one message through the same
/// queue, worker and ledger the watcher uses.
///
/// Running the same file twice is a no-op the second time; editing it makes it run again.
pub fn handle(args: Vec<String>, token: &CancellationToken) -> Result<()> {
    let run_args = RunArgs::try_parse_from(&args)?;

    // 1. Resolve inputs.
    let settings =
        commons::load_settings(run_args.config.as_deref(), run_args.keep_backups, None)?;
    let root = commons::existing_dir(&run_args.root)?;
    let text = commons::read_message(&run_args.message)?;
    let message_id = run_args
        .id
        .clone()
        .unwrap_or_else(|| default_message_id(&run_args.message));

    let unit = MessageUnit::from_message(message_id, &text, root.clone());
    if unit.commands.is_empty() && unit.warnings.is_empty() {
        println!("No commands found in the message.");
        return Ok(());
    }

    // 2. Execute through the worker, with Ctrl+C raising the token.
    let _interrupt_listener = commons::listen_for_interrupt(token)?;
    let ledger = Ledger::load(&Ledger::default_path(&root))?;
    let executor = commons::build_executor(settings, token)?;
    let (report_tx, mut report_rx) = tokio::sync::mpsc::unbounded_channel();
    let (queue, worker) = Worker::spawn(executor, ledger, Some(report_tx))?;
    queue.submit(unit)?;
    drop(queue);
    worker.join()?;
    commons::check_for_cancellation(token)?;

    // 3. Report.
    let report = report_rx
        .try_recv()
        .map_err(|_| anyhow!("The worker finished without reporting on the message."))?;
    commons::print_report(&report);

    let unsuccessful = report.count(CommandState::Rejected) + report.count(CommandState::Failed);
    if unsuccessful > 0 {
        return Err(anyhow!("{} command(s) did not complete.", unsuccessful));
    }
    Ok(())
}

/// The file stem of the message file, or `stdin`.
fn default_message_id(source: &str) -> String {
    if source == "-" {
        return "stdin".to_string();
    }
    Path::new(source)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string())
}
