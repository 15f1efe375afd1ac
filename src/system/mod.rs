//! # System Interaction Layer
//!
//! The boundary between the core and the operating system.
//!
//! ## Modules
//!
//! - **`runner`**: spawns whitelisted external commands with a wall-clock limit and
//!   kills their process group on timeout or Ctrl+C.
//! - **`queue`**: the task queue and its single worker thread, which owns the ledger
//!   and the clipboard.
//! - **`watcher`**: polls LM Studio conversation files and submits changed messages.

/// Task queue and the single worker thread.
pub mod queue;
/// Whitelisted external commands.
pub mod runner;
/// Conversation folder polling.
pub mod watcher;
