// EN: src/cli/handlers/mod.rs

// One module per CLI action.

/// `filegenie backups`.
pub mod backups;
/// Helpers shared by the handlers.
pub mod commons;
/// `filegenie parse`.
pub mod parse;
/// `filegenie run`.
pub mod run;
/// `filegenie watch`.
pub mod watch;
