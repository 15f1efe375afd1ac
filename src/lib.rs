//! # filegenie
//!
//! Executes file commands written inside chat messages (`/create_file`, `/patch`,
//! `/cmd`, ...) against a sandbox folder, exactly once per message version.
//!
//! - [`core`]: parsing, sandboxing, backups, the ledger and the command executor.
//! - [`system`]: external processes, the task queue/worker and the conversation watcher.
//! - [`cli`]: argument structs and one handler per CLI action.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Raised on Ctrl+C; observed by the worker and the external command runner.
pub type CancellationToken = Arc<AtomicBool>;

/// Argument structs and action handlers.
pub mod cli;
/// Fixed names, formats and defaults.
pub mod constants;
pub mod core;
/// Data shared between the parser, the executor and the worker.
pub mod models;
pub mod system;
