// EN: src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::core::{ledger, parser};

// --- PARSED COMMANDS ---

/// A single command invocation found in a message.
/// Immutable once produced by the parser; consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The command name without the sigil (e.g. `create_file`).
    pub name: String,
    /// Positional arguments in the order they appeared on the command line.
    pub args: Vec<String>,
    /// The verbatim content of a fenced block bound to this command, if any.
    pub raw_block: Option<String>,
}

impl Command {
    /// Builds a command without a fenced block.
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            raw_block: None,
        }
    }

    /// Attaches a fenced block to the command.
    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.raw_block = Some(block.into());
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name)?;
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        if let Some(block) = &self.raw_block {
            write!(f, " <block: {} bytes>", block.len())?;
        }
        Ok(())
    }
}

/// A line that looked like a command but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// 1-based line number inside the message text.
    pub line: usize,
    /// Human readable explanation.
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

// --- QUEUE UNITS ---

/// One message's full, ordered command list: the granularity of idempotency marking.
#[derive(Debug, Clone)]
pub struct MessageUnit {
    /// Identity assigned by the producer (stable across edits of the same message).
    pub message_id: String,
    /// The sandbox root every command of this message is confined to.
    pub conversation_root: PathBuf,
    /// Hex-encoded blake3 digest of the raw message text.
    pub content_hash: String,
    /// Commands in document order.
    pub commands: Vec<Command>,
    /// Lines that were skipped by the tolerant parser.
    pub warnings: Vec<ParseWarning>,
}

impl MessageUnit {
    /// Builds a unit from the producer tuple `(message_id, message_text, conversation_root)`.
    ///
    /// The hash is taken over the raw text, independent of what the parser extracts,
    /// so an edit that does not change the commands still counts as a new unit.
    pub fn from_message(
        message_id: impl Into<String>,
        message_text: &str,
        conversation_root: impl Into<PathBuf>,
    ) -> Self {
        let parsed = parser::parse(message_text);
        Self {
            message_id: message_id.into(),
            conversation_root: conversation_root.into(),
            content_hash: ledger::content_hash(message_text),
            commands: parsed.commands,
            warnings: parsed.warnings,
        }
    }
}

// --- EXECUTION RESULTS ---

/// Terminal state of a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// The operation completed (possibly as a reported no-op).
    Done,
    /// Validation refused the command; the filesystem was not touched.
    Rejected,
    /// The operation started but an I/O or process error stopped it.
    Failed,
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Done => "DONE",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// The result of driving one command through the executor.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The command that was attempted.
    pub command: Command,
    /// Where it ended.
    pub state: CommandState,
    /// What happened, suitable for logs and CLI output.
    pub detail: String,
}

/// Everything the worker did (or chose not to do) for one unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    /// The unit's message id.
    pub message_id: String,
    /// The unit's content hash.
    pub content_hash: String,
    /// `true` when the ledger already had this exact content and nothing ran.
    pub skipped: bool,
    /// One entry per attempted command, in execution order.
    pub outcomes: Vec<CommandOutcome>,
    /// Commands left untouched because the run was interrupted first.
    /// A unit with any such command is not recorded in the ledger.
    pub not_attempted: Vec<Command>,
    /// Parse warnings carried over from the unit.
    pub warnings: Vec<ParseWarning>,
}

impl UnitReport {
    /// Number of outcomes in the given state.
    pub fn count(&self, state: CommandState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Whether the unit stopped before its last command.
    pub fn interrupted(&self) -> bool {
        !self.not_attempted.is_empty()
    }
}

// --- PERSISTED / FILESYSTEM RECORDS ---

/// A copy of a file taken right before a destructive mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// The file that was backed up.
    pub original_path: PathBuf,
    /// Where the copy lives (`<name>.bak.<YYYYMMDDHHMMSS>` next to the original).
    pub backup_path: PathBuf,
    /// The `YYYYMMDDHHMMSS` stamp used in the name.
    pub timestamp: String,
}

/// One row of the idempotency ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Hash of the message text that was executed.
    pub content_hash: String,
    /// Unix seconds at which the unit finished.
    pub processed_at: u64,
}
