// EN: src/system/queue.rs

//! # Task Queue / Worker
//!
//! One producer side ([`QueueHandle`], cloneable, usable from sync or async code) and
//! exactly one consumer: a dedicated OS thread that owns the [`Ledger`], the
//! [`Clipboard`] and the [`Executor`]. Units are executed one at a time, their commands
//! strictly in document order, so no two commands ever touch the sandbox concurrently.

use crate::{
    core::{clipboard::Clipboard, ledger::Ledger, operations::Executor, sandbox::Sandbox},
    models::{CommandOutcome, CommandState, MessageUnit, UnitReport},
};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Errors from submitting to or stopping the worker.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The receiving side is gone.
    #[error("The worker has shut down; unit '{0}' was not queued.")]
    Closed(String),
    /// The worker thread ended by panicking.
    #[error("The worker thread panicked.")]
    WorkerPanicked,
    /// The OS refused to start the thread.
    #[error("Could not start the worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// What travels over the queue.
#[derive(Debug)]
enum Job {
    Unit(Box<MessageUnit>),
    Shutdown,
}

/// Producer side of the queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    sender: UnboundedSender<Job>,
}

impl QueueHandle {
    /// Enqueues a unit. Never blocks.
    pub fn submit(&self, unit: MessageUnit) -> Result<(), QueueError> {
        let id = unit.message_id.clone();
        self.sender
            .send(Job::Unit(Box::new(unit)))
            .map_err(|_| QueueError::Closed(id))
    }
}

/// Control side of the worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    sender: UnboundedSender<Job>,
    thread: JoinHandle<Ledger>,
}

impl WorkerHandle {
    /// Asks the worker to stop accepting units. Units already queued still run.
    pub fn shutdown(&self) {
        if self.sender.send(Job::Shutdown).is_err() {
            log::debug!("Worker already stopped.");
        }
    }

    /// Shuts down, waits for the queue to drain and returns the flushed ledger.
    pub fn join(self) -> Result<Ledger, QueueError> {
        self.shutdown();
        drop(self.sender);
        self.thread.join().map_err(|_| QueueError::WorkerPanicked)
    }
}

/// Spawns the single worker thread.
#[derive(Debug)]
pub struct Worker;

impl Worker {
    /// Starts the worker with a ledger that has already been loaded from disk, so every
    /// previously processed unit is known before the first one is taken off the queue.
    ///
    /// # Arguments
    /// * `executor` - Runs the commands.
    /// * `ledger` - The loaded idempotency ledger; handed back by [`WorkerHandle::join`].
    /// * `reports` - Optional channel receiving one [`UnitReport`] per unit.
    pub fn spawn(
        executor: Executor,
        ledger: Ledger,
        reports: Option<UnboundedSender<UnitReport>>,
    ) -> Result<(QueueHandle, WorkerHandle), QueueError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name("filegenie-worker".to_string())
            .spawn(move || run_worker(receiver, executor, ledger, reports))
            .map_err(QueueError::Spawn)?;

        Ok((
            QueueHandle {
                sender: sender.clone(),
            },
            WorkerHandle { sender, thread },
        ))
    }
}

fn run_worker(
    mut receiver: UnboundedReceiver<Job>,
    executor: Executor,
    mut ledger: Ledger,
    reports: Option<UnboundedSender<UnitReport>>,
) -> Ledger {
    let mut clipboard = Clipboard::new();
    log::debug!("Worker started with {} ledger entries.", ledger.len());

    while let Some(job) = receiver.blocking_recv() {
        let unit = match job {
            Job::Unit(unit) => unit,
            Job::Shutdown => {
                // Refuse new units but keep draining what is already buffered.
                receiver.close();
                continue;
            }
        };
        if executor.is_cancelled() {
            log::info!("[{}] Interrupted, not executing.", unit.message_id);
            continue;
        }
        let report = process_unit(&executor, &mut ledger, &mut clipboard, &unit);
        if let Some(reports) = &reports {
            if reports.send(report).is_err() {
                log::trace!("Report receiver dropped.");
            }
        }
    }

    if let Err(e) = ledger.flush() {
        log::error!("Final ledger flush failed: {}", e);
    }
    log::debug!("Worker stopped.");
    ledger
}

/// Executes one unit: ledger check, every command in order, then the ledger mark.
///
/// The mark happens only after all commands were attempted. A crash in between leaves
/// the unit unmarked, so it runs again from the start on the next delivery. The
/// cancellation token is checked before each command; once it is raised the remaining
/// commands are left in [`UnitReport::not_attempted`] and the unit stays unmarked.
pub fn process_unit(
    executor: &Executor,
    ledger: &mut Ledger,
    clipboard: &mut Clipboard,
    unit: &MessageUnit,
) -> UnitReport {
    let mut report = UnitReport {
        message_id: unit.message_id.clone(),
        content_hash: unit.content_hash.clone(),
        skipped: false,
        outcomes: Vec::with_capacity(unit.commands.len()),
        not_attempted: Vec::new(),
        warnings: unit.warnings.clone(),
    };

    if ledger.has_processed(&unit.message_id, &unit.content_hash) {
        log::debug!("[{}] Already processed, skipping.", unit.message_id);
        report.skipped = true;
        return report;
    }
    for warning in &unit.warnings {
        log::warn!("[{}] Parse warning at {}", unit.message_id, warning);
    }

    // 1. Open the sandbox. Without it nothing can run, and the unit stays unmarked.
    let sandbox = match Sandbox::new(&unit.conversation_root) {
        Ok(sandbox) => sandbox,
        Err(e) => {
            log::error!("[{}] {}", unit.message_id, e);
            report.outcomes = unit
                .commands
                .iter()
                .map(|command| CommandOutcome {
                    command: command.clone(),
                    state: CommandState::Failed,
                    detail: e.to_string(),
                })
                .collect();
            return report;
        }
    };

    // 2. Run every command to a terminal state, in document order.
    if !unit.commands.is_empty() {
        log::info!(
            "[{}] Executing {} command(s) in '{}'",
            unit.message_id,
            unit.commands.len(),
            sandbox.root().display()
        );
    }
    for (index, command) in unit.commands.iter().enumerate() {
        if executor.is_cancelled() {
            report.not_attempted = unit.commands.iter().skip(index).cloned().collect();
            break;
        }
        let outcome = executor.execute(command, &sandbox, clipboard, &unit.message_id);
        report.outcomes.push(outcome);
    }

    // 3. Mark the unit, unless it was cut short: then it runs again next time.
    if report.interrupted() {
        log::warn!(
            "[{}] Interrupted with {} command(s) not attempted, not recorded.",
            unit.message_id,
            report.not_attempted.len()
        );
        return report;
    }
    if let Err(e) = ledger.mark_processed(&unit.message_id, &unit.content_hash) {
        log::error!("[{}] Could not record unit in ledger: {}", unit.message_id, e);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancellationToken;
    use crate::core::{
        config::Settings,
        extensions::{Extension, ExtensionRegistry},
    };
    use regex::Regex;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::{TempDir, tempdir};

    struct Harness {
        _dir: TempDir,
        root: PathBuf,
        ledger_path: PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path().join("sandbox");
            fs::create_dir_all(&root).unwrap();
            let ledger_path = dir.path().join("state").join("ledger.json");
            Self {
                _dir: dir,
                root,
                ledger_path,
            }
        }

        fn unit(&self, id: &str, text: &str) -> MessageUnit {
            MessageUnit::from_message(id, text, &self.root)
        }

        /// Runs the units through a fresh worker and returns the reports.
        fn deliver(&self, units: Vec<MessageUnit>) -> Vec<UnitReport> {
            // --- Setup ---
            let executor = Executor::new(
                Settings::default(),
                ExtensionRegistry::new(),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
            let ledger = Ledger::load(&self.ledger_path).unwrap();
            let (report_tx, mut report_rx) = mpsc::unbounded_channel();
            let (queue, worker) = Worker::spawn(executor, ledger, Some(report_tx)).unwrap();

            // --- Execute ---
            for unit in units {
                queue.submit(unit).unwrap();
            }
            drop(queue);
            worker.join().unwrap();

            let mut reports = Vec::new();
            while let Ok(report) = report_rx.try_recv() {
                reports.push(report);
            }
            reports
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.root.join(rel)
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.path(rel)).unwrap()
        }
    }

    fn states(report: &UnitReport) -> Vec<CommandState> {
        report.outcomes.iter().map(|o| o.state).collect()
    }

    #[test]
    fn test_commands_run_in_document_order() {
        let h = Harness::new();
        let text = "Here:\n/create_file \"a.txt\" \"hello\"\n/append \"a.txt\" \" world\"\n/replace \"a.txt\" \"hello\" \"hi\"\n";
        let reports = h.deliver(vec![h.unit("c#1", text)]);

        assert_eq!(reports.len(), 1);
        assert_eq!(states(&reports[0]), vec![CommandState::Done; 3]);
        assert_eq!(h.read("a.txt"), "hi world");
    }

    #[test]
    fn test_set_line_keeps_other_lines() {
        let h = Harness::new();
        fs::write(h.path("a.txt"), "first\nsecond\nthird\n").unwrap();
        h.deliver(vec![h.unit("c#1", "/set_line 2 \"a.txt\" \"X\"")]);
        assert_eq!(h.read("a.txt"), "first\nX\nthird\n");
    }

    #[test]
    fn test_delete_file_leaves_named_backup() {
        let h = Harness::new();
        fs::write(h.path("a.txt"), "data").unwrap();
        let reports = h.deliver(vec![h.unit("c#1", "/delete_file \"a.txt\"")]);

        assert_eq!(states(&reports[0]), vec![CommandState::Done]);
        assert!(!h.path("a.txt").exists());
        let pattern = Regex::new(r"^a\.txt\.bak\.\d{14}$").unwrap();
        let backups: Vec<String> = fs::read_dir(&h.root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| pattern.is_match(n))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_cmd_outside_whitelist_is_rejected_and_later_commands_run() {
        let h = Harness::new();
        let reports = h.deliver(vec![h.unit(
            "c#1",
            "/cmd \"rm -rf /\"\n/create_folder \"still_runs\"",
        )]);
        assert_eq!(
            states(&reports[0]),
            vec![CommandState::Rejected, CommandState::Done]
        );
        assert!(h.path("still_runs").is_dir());
    }

    #[test]
    fn test_paste_uses_content_at_copy_time() {
        let h = Harness::new();
        fs::write(h.path("a.txt"), "original").unwrap();
        let text = "/copy_file \"a.txt\"\n/set \"a.txt\" \"changed\"\n/paste_file \"b.txt\"";
        h.deliver(vec![h.unit("c#1", text)]);
        assert_eq!(h.read("a.txt"), "changed");
        assert_eq!(h.read("b.txt"), "original");
    }

    #[test]
    fn test_redelivery_is_idempotent_until_text_changes() {
        // --- Setup ---
        let h = Harness::new();
        let text = "/append \"log.txt\" \"x\"";
        h.deliver(vec![h.unit("c#1", text)]);
        assert_eq!(h.read("log.txt"), "x");

        // --- Execute: identical text, across a restart (fresh worker, reloaded ledger) ---
        let reports = h.deliver(vec![h.unit("c#1", text)]);

        // --- Assert ---
        assert!(reports[0].skipped);
        assert!(reports[0].outcomes.is_empty());
        assert_eq!(h.read("log.txt"), "x");

        // --- Execute: edited message, same id ---
        let reports = h.deliver(vec![h.unit("c#1", "/append \"log.txt\" \"y\"")]);
        assert!(!reports[0].skipped);
        assert_eq!(h.read("log.txt"), "xy");
    }

    #[test]
    fn test_identical_text_under_another_id_runs() {
        let h = Harness::new();
        let text = "/append \"log.txt\" \"x\"";
        h.deliver(vec![h.unit("c#1", text), h.unit("c#2", text)]);
        assert_eq!(h.read("log.txt"), "xx");
    }

    #[test]
    fn test_patch_mismatch_leaves_file_untouched() {
        let h = Harness::new();
        let original = "alpha\nbeta\ngamma\n";
        fs::write(h.path("f.txt"), original).unwrap();
        let text = "/patch \"f.txt\"\n```\nalpha\n-BETA\n+b\n```\n";
        let reports = h.deliver(vec![h.unit("c#1", text)]);
        assert_eq!(states(&reports[0]), vec![CommandState::Rejected]);
        assert_eq!(h.read("f.txt"), original);
    }

    #[test]
    fn test_parse_warnings_are_reported_and_do_not_abort() {
        let h = Harness::new();
        let reports = h.deliver(vec![h.unit(
            "c#1",
            "/create_file \"broken.txt\n/create_folder \"ok\"",
        )]);
        assert_eq!(reports[0].warnings.len(), 1);
        assert_eq!(states(&reports[0]), vec![CommandState::Done]);
    }

    #[test]
    fn test_missing_root_fails_unit_without_marking() {
        let h = Harness::new();
        let unit = MessageUnit::from_message(
            "c#1",
            "/create_folder x",
            Path::new(&h.root).join("does-not-exist"),
        );
        let reports = h.deliver(vec![unit.clone()]);
        assert_eq!(states(&reports[0]), vec![CommandState::Failed]);

        let ledger = Ledger::load(&h.ledger_path).unwrap();
        assert!(!ledger.has_processed(&unit.message_id, &unit.content_hash));
    }

    #[test]
    fn test_interrupted_worker_neither_executes_nor_records() {
        let h = Harness::new();
        let executor = Executor::new(
            Settings::default(),
            ExtensionRegistry::new(),
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap();
        let (queue, worker) =
            Worker::spawn(executor, Ledger::load(&h.ledger_path).unwrap(), None).unwrap();
        queue.submit(h.unit("c#1", "/create_folder \"x\"")).unwrap();
        let ledger = worker.join().unwrap();

        assert!(ledger.is_empty());
        assert!(!h.path("x").exists());
    }

    /// Raises the token it holds, the way Ctrl+C does while a command runs.
    struct RaiseToken(CancellationToken);

    impl Extension for RaiseToken {
        fn handle(&self, _name: &str, _args: &[String], _base_dir: &Path) -> anyhow::Result<String> {
            self.0.store(true, Ordering::SeqCst);
            Ok("token raised".to_string())
        }
    }

    #[test]
    fn test_interruption_mid_unit_stops_before_next_command() {
        // --- Setup ---
        let h = Harness::new();
        let text = "/raise_token\n/append \"log.txt\" \"x\"";
        let deliver = |shared: bool| {
            let token = Arc::new(AtomicBool::new(false));
            let extension_token = if shared {
                token.clone()
            } else {
                Arc::new(AtomicBool::new(false))
            };
            let mut extensions = ExtensionRegistry::new();
            extensions.register("raise_token", Box::new(RaiseToken(extension_token)));
            let executor = Executor::new(Settings::default(), extensions, token).unwrap();
            let (report_tx, mut report_rx) = mpsc::unbounded_channel();
            let (queue, worker) = Worker::spawn(
                executor,
                Ledger::load(&h.ledger_path).unwrap(),
                Some(report_tx),
            )
            .unwrap();
            queue.submit(h.unit("c#1", text)).unwrap();
            drop(queue);
            let ledger = worker.join().unwrap();
            (report_rx.try_recv().unwrap(), ledger)
        };

        // --- Execute: interrupted after the first command ---
        let (report, ledger) = deliver(true);

        // --- Assert ---
        assert_eq!(states(&report), vec![CommandState::Done]);
        assert_eq!(report.not_attempted.len(), 1);
        assert_eq!(report.not_attempted[0].name, "append");
        assert!(ledger.is_empty());
        assert!(!h.path("log.txt").exists());

        // --- Execute: restart without interruption, then redeliver ---
        let (report, ledger) = deliver(false);
        assert!(!report.interrupted());
        assert_eq!(ledger.len(), 1);
        let (report, _) = deliver(false);
        assert!(report.skipped);

        // --- Assert: the append landed exactly once ---
        assert_eq!(h.read("log.txt"), "x");
    }

    #[test]
    fn test_join_drains_queue_and_returns_ledger() {
        let h = Harness::new();
        let executor = Executor::new(
            Settings::default(),
            ExtensionRegistry::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        let (queue, worker) =
            Worker::spawn(executor, Ledger::load(&h.ledger_path).unwrap(), None).unwrap();

        for i in 0..5 {
            let text = format!("/append \"n.txt\" \"{}\"", i);
            queue.submit(h.unit(&format!("c#{}", i), &text)).unwrap();
        }
        let ledger = worker.join().unwrap();

        assert_eq!(ledger.len(), 5);
        assert_eq!(h.read("n.txt"), "01234");
        assert!(queue.submit(h.unit("late", "/create_folder z")).is_err());
    }
}
