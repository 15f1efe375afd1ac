// EN: src/system/watcher.rs

use crate::{
    CancellationToken,
    core::conversation::{self, Conversation, ConversationError},
    models::MessageUnit,
    system::queue::{QueueError, QueueHandle},
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tokio::time::MissedTickBehavior;

/// Errors from one polling pass.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The conversations folder could not be listed.
    #[error("Conversations folder '{path}' could not be listed: {source}")]
    ListFolder {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A conversation file could not be read or its sandbox prepared.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    /// The worker stopped accepting units.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Where to look and where conversation sandboxes live.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Folder holding `*.json` conversation files.
    pub folder: PathBuf,
    /// Watch only this file instead of the whole folder.
    pub conversation: Option<PathBuf>,
    /// Parent directory of the per-conversation sandbox roots.
    pub workspace: PathBuf,
    /// Time between two scans.
    pub poll_interval: Duration,
}

/// Polling producer: turns changed conversation files into queued units.
///
/// It remembers what it already submitted only to avoid flooding the queue; the
/// worker's ledger stays the authority on what has been executed.
#[derive(Debug)]
pub struct ConversationWatcher {
    options: WatchOptions,
    seen_mtimes: HashMap<PathBuf, SystemTime>,
    submitted: HashMap<String, String>,
}

impl ConversationWatcher {
    /// Creates a watcher that has not seen any file yet.
    pub fn new(options: WatchOptions) -> Self {
        Self {
            options,
            seen_mtimes: HashMap::new(),
            submitted: HashMap::new(),
        }
    }

    /// Polls until Ctrl+C. On interruption the cancellation token is raised so a
    /// running `/cmd` is killed and queued units are not started.
    pub async fn run(mut self, queue: QueueHandle, cancellation_token: CancellationToken) {
        log::info!(
            "Watching '{}' every {:?} (workspace: {})",
            self.options
                .conversation
                .as_deref()
                .unwrap_or(self.options.folder.as_path())
                .display(),
            self.options.poll_interval,
            self.options.workspace.display()
        );

        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan(&queue) {
                        Ok(0) => {}
                        Ok(n) => log::debug!("Queued {} unit(s).", n),
                        Err(WatchError::Queue(e)) => {
                            log::error!("{}", e);
                            break;
                        }
                        Err(e) => log::warn!("{}", e),
                    }
                }
                result = &mut ctrl_c => {
                    if let Err(e) = result {
                        log::warn!("Could not listen for Ctrl+C: {}", e);
                    }
                    log::info!("Interrupted, stopping.");
                    cancellation_token.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// One polling pass over the watched files.
    ///
    /// # Returns
    /// The number of units submitted.
    pub fn scan(&mut self, queue: &QueueHandle) -> Result<usize, WatchError> {
        let mut submitted = 0;
        for path in self.candidates()? {
            let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            if self.seen_mtimes.get(&path) == Some(&modified) {
                continue;
            }
            self.seen_mtimes.insert(path.clone(), modified);

            match self.submit_changes(&path, queue) {
                Ok(n) => submitted += n,
                // A half-written file will be read again once its mtime moves.
                Err(WatchError::Conversation(e)) => log::warn!("{}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(submitted)
    }

    fn candidates(&self) -> Result<Vec<PathBuf>, WatchError> {
        if let Some(single) = &self.options.conversation {
            return Ok(vec![single.clone()]);
        }
        let folder = &self.options.folder;
        let entries = fs::read_dir(folder).map_err(|e| WatchError::ListFolder {
            path: folder.display().to_string(),
            source: e,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_json(p))
            .collect();
        files.sort();
        Ok(files)
    }

    fn submit_changes(&mut self, path: &Path, queue: &QueueHandle) -> Result<usize, WatchError> {
        let conversation = Conversation::load(path)?;
        let mut root: Option<PathBuf> = None;
        let mut submitted = 0;

        for message in conversation.messages.iter().filter(|m| m.is_executable()) {
            if message.text.is_empty() {
                continue;
            }
            let id = conversation::message_id(path, message.index);
            let unit_root = match &root {
                Some(dir) => dir.clone(),
                None => {
                    let dir = conversation::conversation_dir(
                        &self.options.workspace,
                        path,
                        &conversation.name,
                    )?;
                    root = Some(dir.clone());
                    dir
                }
            };

            let unit = MessageUnit::from_message(id.clone(), &message.text, unit_root);
            if self.submitted.get(&id) == Some(&unit.content_hash) {
                continue;
            }
            self.submitted.insert(id.clone(), unit.content_hash.clone());
            if unit.commands.is_empty() && unit.warnings.is_empty() {
                continue;
            }

            log::info!("[{}] Queuing {} command(s).", id, unit.commands.len());
            queue.submit(unit)?;
            submitted += 1;
        }
        Ok(submitted)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        config::Settings, extensions::ExtensionRegistry, ledger::Ledger, operations::Executor,
    };
    use crate::system::queue::Worker;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    #[test]
    fn test_scan_queues_new_and_edited_assistant_messages() {
        // --- Setup ---
        let convs = tempdir().unwrap();
        let workspace = tempdir().unwrap();
        let state = tempdir().unwrap();
        let conv_path = convs.path().join("chat.json");
        let write_conv = |assistant: &str| {
            let json = serde_json::json!({
                "name": "demo",
                "messages": [
                    {"role": "user", "content": "/create_folder from_user"},
                    {"role": "assistant", "content": assistant}
                ]
            });
            fs::write(&conv_path, json.to_string()).unwrap();
        };
        write_conv("/create_folder \"made\"");

        let executor = Executor::new(
            Settings::default(),
            ExtensionRegistry::new(),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        let ledger = Ledger::load(&state.path().join("ledger.json")).unwrap();
        let (queue, worker) = Worker::spawn(executor, ledger, None).unwrap();
        let mut watcher = ConversationWatcher::new(WatchOptions {
            folder: convs.path().to_path_buf(),
            conversation: None,
            workspace: workspace.path().to_path_buf(),
            poll_interval: Duration::from_millis(10),
        });

        // --- Execute ---
        let first = watcher.scan(&queue).unwrap();
        let unchanged = watcher.scan(&queue).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        write_conv("/create_folder \"made\"\n/create_folder \"again\"");
        // Force a re-read even if the filesystem mtime resolution is coarse.
        watcher.seen_mtimes.clear();
        let edited = watcher.scan(&queue).unwrap();
        drop(queue);
        let ledger = worker.join().unwrap();

        // --- Assert ---
        assert_eq!((first, unchanged, edited), (1, 0, 1));
        let root = workspace.path().join("demo");
        assert!(root.join("made").is_dir());
        assert!(root.join("again").is_dir());
        assert!(!root.join("from_user").exists());
        assert_eq!(ledger.len(), 1);
    }
}
