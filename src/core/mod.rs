// EN: src/core/mod.rs

//! # Core Domain
//!
//! Everything here is independent of how messages arrive. The pieces, bottom-up:
//!
//! - **`sandbox`**: confines every user-supplied path to one root directory.
//! - **`backup`**: timestamped backups, atomic writes and the trash folder.
//! - **`parser`** / **`text`** / **`patch`**: turn message text into commands and
//!   apply line-level edits.
//! - **`clipboard`**, **`ledger`**: the worker's two pieces of state.
//! - **`operations`**: the executor that drives each command to DONE, REJECTED or FAILED.
//! - **`extensions`**, **`config`**, **`conversation`**: pluggable commands, settings and
//!   the LM Studio conversation format.

/// Backups, atomic writes and the trash.
pub mod backup;
/// The single-slot clipboard.
pub mod clipboard;
/// Settings and the command whitelist.
pub mod config;
/// LM Studio conversation files.
pub mod conversation;
/// Commands registered outside the built-in catalogue.
pub mod extensions;
/// The idempotency ledger.
pub mod ledger;
/// The command executor.
pub mod operations;
/// Message text to commands.
pub mod parser;
/// Line patches, validated before anything is written.
pub mod patch;
/// Path confinement to one root.
pub mod sandbox;
/// Line arrays and command-line stripping.
pub mod text;
