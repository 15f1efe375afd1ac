// EN: src/core/operations.rs

//! # Operation Executor
//!
//! Implements every built-in command against a [`Sandbox`]. Each command walks the
//! same small state machine: all arguments and paths are validated first (any
//! problem ends in REJECTED without touching the disk), then the operation runs
//! (an I/O error ends in FAILED). One command's failure never stops the next.

use crate::{
    CancellationToken,
    constants::STATE_DIR,
    core::{
        backup::{self, BackupError, BackupService},
        clipboard::Clipboard,
        config::{ConfigError, Settings, Whitelist},
        extensions::ExtensionRegistry,
        patch,
        sandbox::{Sandbox, SandboxError},
        text::{self, TextLines},
    },
    models::{BackupRecord, Command, CommandOutcome, CommandState},
    system::runner::{CommandRunner, RunnerError},
};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
};
use thiserror::Error;

/// Why a command did not reach DONE.
#[derive(Error, Debug)]
pub enum OperationError {
    /// A path escapes the sandbox root.
    #[error(transparent)]
    SandboxViolation(#[from] SandboxError),
    /// Arguments or preconditions are wrong.
    #[error("{0}")]
    Validation(String),
    /// A filesystem call failed mid-operation.
    #[error("I/O failure on '{path}': {source}")]
    Io {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A backup, atomic write or trash move failed.
    #[error(transparent)]
    Storage(#[from] BackupError),
    /// `/cmd` was given a command line that is not whitelisted.
    #[error("Command {0:?} is not on the whitelist.")]
    WhitelistDenied(String),
    /// `/cmd` ran past its limit.
    #[error("{0}")]
    TimedOut(String),
    /// `/cmd` could not run, exited non-zero or was interrupted.
    #[error("{0}")]
    ProcessFailed(String),
    /// Neither an extension nor a built-in has this name.
    #[error("Unknown command /{0}")]
    UnknownCommand(String),
    /// An extension returned an error.
    #[error("Extension /{name} failed: {reason}")]
    Extension {
        /// The extension command name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl OperationError {
    /// The terminal state this error puts a command in.
    pub fn state(&self) -> CommandState {
        match self {
            Self::SandboxViolation(_)
            | Self::Validation(_)
            | Self::WhitelistDenied(_)
            | Self::UnknownCommand(_) => CommandState::Rejected,
            Self::Io { .. }
            | Self::Storage(_)
            | Self::TimedOut(_)
            | Self::ProcessFailed(_)
            | Self::Extension { .. } => CommandState::Failed,
        }
    }
}

impl From<RunnerError> for OperationError {
    fn from(error: RunnerError) -> Self {
        match error {
            RunnerError::WhitelistDenied(line) => Self::WhitelistDenied(line),
            RunnerError::EmptyCommand | RunnerError::CommandParse(_) => {
                Self::Validation(error.to_string())
            }
            RunnerError::TimedOut { .. } => Self::TimedOut(error.to_string()),
            RunnerError::Spawn(..) | RunnerError::Wait(..) | RunnerError::Cancelled => {
                Self::ProcessFailed(error.to_string())
            }
        }
    }
}

type OpResult<T> = Result<T, OperationError>;

fn invalid(message: impl Into<String>) -> OperationError {
    OperationError::Validation(message.into())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> OperationError + '_ {
    move |source| OperationError::Io {
        path: path.display().to_string(),
        source,
    }
}

// --- Command Definition and Registry ---

type Handler = fn(&Executor, &Command, &mut Invocation<'_>) -> OpResult<String>;

/// A built-in command, its aliases and its handler.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: Handler,
}

/// The built-in catalogue. Extensions registered under the same name take precedence.
static BUILTIN_COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        name: "create_file",
        aliases: &["create_script"],
        handler: create_file,
    },
    CommandDefinition {
        name: "create_folder",
        aliases: &[],
        handler: create_folder,
    },
    CommandDefinition {
        name: "set",
        aliases: &[],
        handler: set,
    },
    CommandDefinition {
        name: "set_line",
        aliases: &[],
        handler: set_line,
    },
    CommandDefinition {
        name: "append",
        aliases: &[],
        handler: append,
    },
    CommandDefinition {
        name: "replace",
        aliases: &[],
        handler: replace,
    },
    CommandDefinition {
        name: "delete_file",
        aliases: &[],
        handler: delete_file,
    },
    CommandDefinition {
        name: "delete_folder",
        aliases: &[],
        handler: delete_folder,
    },
    CommandDefinition {
        name: "remove_line",
        aliases: &[],
        handler: remove_line,
    },
    CommandDefinition {
        name: "move_file",
        aliases: &[],
        handler: move_file,
    },
    CommandDefinition {
        name: "copy_file",
        aliases: &[],
        handler: copy_file,
    },
    CommandDefinition {
        name: "paste_file",
        aliases: &[],
        handler: paste_file,
    },
    CommandDefinition {
        name: "patch",
        aliases: &[],
        handler: patch_file,
    },
    CommandDefinition {
        name: "cmd",
        aliases: &[],
        handler: run_external,
    },
];

/// Finds a built-in command by its name or one of its aliases.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    BUILTIN_COMMANDS
        .iter()
        .find(|c| c.name == name || c.aliases.contains(&name))
}

/// Names of all built-in commands, for help output.
pub fn builtin_command_names() -> Vec<&'static str> {
    BUILTIN_COMMANDS.iter().map(|c| c.name).collect()
}

/// Per-command mutable state: the sandbox, the clipboard, and the backups taken so far.
struct Invocation<'a> {
    sandbox: &'a Sandbox,
    clipboard: &'a mut Clipboard,
    /// Backups to discard once the command reaches DONE (unless backups are kept).
    backups: Vec<BackupRecord>,
}

impl Invocation<'_> {
    /// Resolves through the sandbox; the `.filegenie` state directory is off limits.
    fn resolve(&self, candidate: &str) -> OpResult<PathBuf> {
        let path = self.sandbox.resolve(candidate)?;
        let first = self.sandbox.relative(&path).components().next();
        if first.is_some_and(|c| c.as_os_str() == STATE_DIR) {
            return Err(invalid(format!("'{}' is reserved", STATE_DIR)));
        }
        Ok(path)
    }

    fn display<'p>(&self, path: &'p Path) -> std::path::Display<'p> {
        self.sandbox.relative(path).display()
    }

    fn require_file(&self, path: &Path) -> OpResult<()> {
        if path.is_file() {
            Ok(())
        } else {
            Err(invalid(format!("'{}' is not an existing file", self.display(path))))
        }
    }

    fn backup(&mut self, service: &BackupService, path: &Path) -> OpResult<()> {
        if let Some(record) = service.backup(path)? {
            self.backups.push(record);
        }
        Ok(())
    }
}

/// Runs commands against sandboxes. Owns the policy (settings), the backup service,
/// the external runner and the extension registry; holds no per-conversation state.
#[derive(Debug)]
pub struct Executor {
    settings: Settings,
    backups: BackupService,
    runner: CommandRunner,
    extensions: ExtensionRegistry,
    cancellation_token: CancellationToken,
}

impl Executor {
    /// Builds an executor from validated settings.
    ///
    /// # Errors
    /// Returns `ConfigError::BadPattern` if a whitelist pattern does not compile.
    pub fn new(
        settings: Settings,
        extensions: ExtensionRegistry,
        cancellation_token: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let whitelist = Whitelist::compile(&settings.whitelist_patterns)?;
        Ok(Self {
            backups: BackupService::new(settings.keep_backups),
            runner: CommandRunner::new(whitelist, settings.cmd_timeout()),
            settings,
            extensions,
            cancellation_token,
        })
    }

    /// Whether an interruption was requested (Ctrl+C).
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::SeqCst)
    }

    /// Drives one command to a terminal state and logs the outcome.
    pub fn execute(
        &self,
        command: &Command,
        sandbox: &Sandbox,
        clipboard: &mut Clipboard,
        message_id: &str,
    ) -> CommandOutcome {
        log::debug!("[{}] Executing {}", message_id, command);
        let mut invocation = Invocation {
            sandbox,
            clipboard,
            backups: Vec::new(),
        };

        let result = self.dispatch(command, &mut invocation);
        self.settle(command, invocation.backups, result, message_id)
    }

    /// Turns a handler result into an outcome. The command's backups are discarded
    /// only when it reached DONE; after REJECTED or FAILED they always stay on disk.
    fn settle(
        &self,
        command: &Command,
        backups: Vec<BackupRecord>,
        result: OpResult<String>,
        message_id: &str,
    ) -> CommandOutcome {
        let (state, detail) = match result {
            Ok(detail) => {
                for record in &backups {
                    self.backups.discard(record);
                }
                (CommandState::Done, detail)
            }
            Err(e) => {
                for record in &backups {
                    log::info!("[{}] Backup kept: {}", message_id, record.backup_path.display());
                }
                (e.state(), e.to_string())
            }
        };

        match state {
            CommandState::Done => log::info!("[{}] /{} DONE: {}", message_id, command.name, detail),
            CommandState::Rejected => {
                log::warn!("[{}] /{} REJECTED: {}", message_id, command.name, detail)
            }
            CommandState::Failed => {
                log::error!("[{}] /{} FAILED: {}", message_id, command.name, detail)
            }
        }

        CommandOutcome {
            command: command.clone(),
            state,
            detail,
        }
    }

    fn dispatch(&self, command: &Command, invocation: &mut Invocation<'_>) -> OpResult<String> {
        if let Some(extension) = self.extensions.lookup(&command.name) {
            let mut args = command.args.clone();
            if let Some(block) = &command.raw_block {
                args.push(block.clone());
            }
            return extension
                .handle(&command.name, &args, invocation.sandbox.root())
                .map_err(|e| OperationError::Extension {
                    name: command.name.clone(),
                    reason: format!("{:#}", e),
                });
        }

        let definition = find_command(&command.name)
            .ok_or_else(|| OperationError::UnknownCommand(command.name.clone()))?;
        (definition.handler)(self, command, invocation)
    }

    /// Applies command-line stripping when enabled.
    fn sanitize(&self, content: String) -> String {
        if !self.settings.strip_command_lines {
            return content;
        }
        let (clean, removed) = text::strip_command_lines(&content);
        if removed > 0 {
            log::info!("Removed {} command-like line(s) from written content", removed);
        }
        clean
    }

    fn check_extension(&self, invocation: &Invocation<'_>, path: &Path) -> OpResult<()> {
        if self.settings.extension_allowed(path) {
            Ok(())
        } else {
            Err(invalid(format!(
                "extension of '{}' is not in the allowed list",
                invocation.display(path)
            )))
        }
    }
}

// --- Argument helpers ---

fn arg<'c>(command: &'c Command, index: usize, usage: &str) -> OpResult<&'c str> {
    command
        .args
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| invalid(format!("usage: {}", usage)))
}

/// The content argument: the fenced block if present, else the remaining arguments
/// joined by single spaces.
fn payload(command: &Command, from: usize) -> Option<String> {
    if let Some(block) = &command.raw_block {
        return Some(block.clone());
    }
    let rest = command.args.get(from..).unwrap_or_default();
    if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    }
}

fn line_number(raw: &str) -> OpResult<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(invalid(format!("invalid line number {:?}", raw))),
    }
}

fn read_text(path: &Path) -> OpResult<String> {
    fs::read_to_string(path).map_err(io_err(path))
}

fn require_not_dir(invocation: &Invocation<'_>, path: &Path) -> OpResult<()> {
    if path.is_dir() {
        Err(invalid(format!("'{}' is a directory", invocation.display(path))))
    } else {
        Ok(())
    }
}

// --- Handlers ---

fn create_file(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let target = inv.resolve(arg(command, 0, "/create_file <path> [content]")?)?;
    require_not_dir(inv, &target)?;

    let Some(content) = payload(command, 1) else {
        if target.exists() {
            return Ok(format!("'{}' already exists, unchanged", inv.display(&target)));
        }
        backup::atomic_write(&target, b"")?;
        return Ok(format!("created empty file '{}'", inv.display(&target)));
    };

    let content = exec.sanitize(content);
    if content.is_empty() {
        return Err(invalid("content is empty after removing command lines"));
    }
    exec.check_extension(inv, &target)?;

    if target.exists() {
        let existing = read_text(&target)?;
        if existing == content {
            return Ok(format!(
                "'{}' already has this content, unchanged",
                inv.display(&target)
            ));
        }
        return Err(invalid(format!(
            "'{}' already exists with different content; use /set to overwrite",
            inv.display(&target)
        )));
    }

    backup::atomic_write(&target, content.as_bytes())?;
    Ok(format!("created '{}' ({} bytes)", inv.display(&target), content.len()))
}

fn create_folder(_exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let target = inv.resolve(arg(command, 0, "/create_folder <path>")?)?;
    if target.is_dir() {
        return Ok(format!("'{}' already exists", inv.display(&target)));
    }
    fs::create_dir_all(&target).map_err(io_err(&target))?;
    Ok(format!("created folder '{}'", inv.display(&target)))
}

fn set(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    // `/set line N path text` is the long form of `/set_line N path text`.
    if command.args.first().is_some_and(|a| a == "line") {
        let shifted = Command {
            name: "set_line".to_string(),
            args: command.args.get(1..).unwrap_or_default().to_vec(),
            raw_block: command.raw_block.clone(),
        };
        return set_line(exec, &shifted, inv);
    }

    let target = inv.resolve(arg(command, 0, "/set <path> <content>")?)?;
    let content = payload(command, 1).ok_or_else(|| invalid("usage: /set <path> <content>"))?;
    require_not_dir(inv, &target)?;

    let content = exec.sanitize(content);
    if content.is_empty() {
        return Err(invalid("nothing to write after removing command lines"));
    }
    exec.check_extension(inv, &target)?;

    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, content.as_bytes())?;
    Ok(format!("wrote '{}' ({} bytes)", inv.display(&target), content.len()))
}

fn set_line(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    const USAGE: &str = "/set_line <n> <path> <text>";
    let n = line_number(arg(command, 0, USAGE)?)?;
    let target = inv.resolve(arg(command, 1, USAGE)?)?;
    let text = match command.args.get(2..) {
        Some(rest) if !rest.is_empty() => rest.join(" "),
        _ => command
            .raw_block
            .as_deref()
            .map(|b| b.strip_suffix('\n').unwrap_or(b).to_string())
            .ok_or_else(|| invalid(format!("usage: {}", USAGE)))?,
    };
    if text.contains('\n') {
        return Err(invalid("replacement text spans more than one line"));
    }
    inv.require_file(&target)?;

    let mut lines = TextLines::parse(&read_text(&target)?);
    let count = lines.len();
    if n > count + 1 {
        return Err(invalid(format!(
            "line {} is out of range ('{}' has {} lines)",
            n,
            inv.display(&target),
            count
        )));
    }
    match lines.lines.get_mut(n - 1) {
        Some(line) => *line = text,
        None => lines.lines.push(text),
    }

    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, lines.render().as_bytes())?;
    Ok(format!("set line {} of '{}'", n, inv.display(&target)))
}

fn append(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let target = inv.resolve(arg(command, 0, "/append <path> <content>")?)?;
    let content =
        payload(command, 1).ok_or_else(|| invalid("usage: /append <path> <content>"))?;
    require_not_dir(inv, &target)?;

    let content = exec.sanitize(content);
    if content.is_empty() {
        return Err(invalid("nothing to append after removing command lines"));
    }

    let existing = if target.exists() {
        read_text(&target)?
    } else {
        String::new()
    };
    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, format!("{}{}", existing, content).as_bytes())?;
    Ok(format!(
        "appended {} bytes to '{}'",
        content.len(),
        inv.display(&target)
    ))
}

fn replace(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    const USAGE: &str = "/replace <path> <old> <new>";
    let target = inv.resolve(arg(command, 0, USAGE)?)?;
    let old = arg(command, 1, USAGE)?;
    let new = payload(command, 2).ok_or_else(|| invalid(format!("usage: {}", USAGE)))?;
    if old.is_empty() {
        return Err(invalid("the text to replace is empty"));
    }
    inv.require_file(&target)?;
    let new = exec.sanitize(new);

    let original = read_text(&target)?;
    let occurrences = original.matches(old).count();
    if occurrences == 0 {
        return Ok(format!(
            "{:?} not found in '{}', unchanged",
            old,
            inv.display(&target)
        ));
    }

    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, original.replace(old, &new).as_bytes())?;
    Ok(format!(
        "replaced {} occurrence(s) in '{}'",
        occurrences,
        inv.display(&target)
    ))
}

fn delete_file(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let target = inv.resolve(arg(command, 0, "/delete_file <path>")?)?;
    inv.require_file(&target)?;

    // Not pushed to `inv.backups`: this copy is the only way back, so it is never discarded.
    let record = exec.backups.backup(&target)?;
    fs::remove_file(&target).map_err(io_err(&target))?;
    Ok(match record {
        Some(r) => format!(
            "deleted '{}' (backup: {})",
            inv.display(&target),
            inv.display(&r.backup_path)
        ),
        None => format!("deleted '{}'", inv.display(&target)),
    })
}

fn delete_folder(_exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let target = inv.resolve(arg(command, 0, "/delete_folder <path>")?)?;
    if target == inv.sandbox.root() {
        return Err(invalid("refusing to delete the sandbox root"));
    }
    if !target.is_dir() {
        return Err(invalid(format!(
            "'{}' is not an existing folder",
            inv.display(&target)
        )));
    }
    let trashed = backup::move_to_trash(inv.sandbox, &target)?;
    Ok(format!(
        "moved '{}' to '{}'",
        inv.display(&target),
        inv.display(&trashed)
    ))
}

fn remove_line(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    const USAGE: &str = "/remove_line <n> <path>";
    let n = line_number(arg(command, 0, USAGE)?)?;
    let target = inv.resolve(arg(command, 1, USAGE)?)?;
    inv.require_file(&target)?;

    let mut lines = TextLines::parse(&read_text(&target)?);
    if n > lines.len() {
        return Err(invalid(format!(
            "line {} is out of range ('{}' has {} lines)",
            n,
            inv.display(&target),
            lines.len()
        )));
    }
    let removed = lines.lines.remove(n - 1);

    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, lines.render().as_bytes())?;
    Ok(format!(
        "removed line {} of '{}' ({:?})",
        n,
        inv.display(&target),
        removed
    ))
}

fn move_file(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    const USAGE: &str = "/move_file <src> <dst>";
    let source = inv.resolve(arg(command, 0, USAGE)?)?;
    let mut destination = inv.resolve(arg(command, 1, USAGE)?)?;
    if !source.exists() {
        return Err(invalid(format!(
            "source '{}' does not exist",
            inv.display(&source)
        )));
    }
    if source == inv.sandbox.root() {
        return Err(invalid("refusing to move the sandbox root"));
    }

    if destination.is_dir() {
        let name = source
            .file_name()
            .ok_or_else(|| invalid("source has no file name"))?;
        destination = destination.join(name);
    }
    if destination == source {
        return Ok(format!("'{}' is already in place", inv.display(&source)));
    }
    if source.is_dir() {
        if destination.starts_with(&source) {
            return Err(invalid("cannot move a folder into itself"));
        }
        if destination.exists() {
            return Err(invalid(format!(
                "destination '{}' already exists",
                inv.display(&destination)
            )));
        }
    }

    inv.backup(&exec.backups, &destination)?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    if let Err(e) = fs::rename(&source, &destination) {
        if !source.is_file() {
            return Err(io_err(&source)(e));
        }
        log::debug!("Rename failed ({}), falling back to copy + remove", e);
        fs::copy(&source, &destination).map_err(io_err(&destination))?;
        fs::remove_file(&source).map_err(io_err(&source))?;
    }
    Ok(format!(
        "moved '{}' to '{}'",
        inv.display(&source),
        inv.display(&destination)
    ))
}

fn copy_file(_exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let source = inv.resolve(arg(command, 0, "/copy_file <path>")?)?;
    inv.require_file(&source)?;
    let content = fs::read(&source).map_err(io_err(&source))?;
    let size = content.len();
    inv.clipboard.copy(&source, content);
    Ok(format!(
        "copied '{}' to the clipboard ({} bytes)",
        inv.display(&source),
        size
    ))
}

fn paste_file(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let target = inv.resolve(arg(command, 0, "/paste_file <path>")?)?;
    let content = match inv.clipboard.peek() {
        Some(slot) => slot.content.clone(),
        None => return Err(invalid("the clipboard is empty")),
    };
    require_not_dir(inv, &target)?;
    exec.check_extension(inv, &target)?;

    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, &content)?;
    Ok(format!(
        "pasted {} bytes into '{}'",
        content.len(),
        inv.display(&target)
    ))
}

fn patch_file(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    const USAGE: &str = "/patch <path> ```<patch lines>```";
    let target = inv.resolve(arg(command, 0, USAGE)?)?;
    let patch_text = match &command.raw_block {
        Some(block) => block.clone(),
        None => command
            .args
            .get(1..)
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.join("\n"))
            .ok_or_else(|| invalid(format!("usage: {}", USAGE)))?,
    };
    inv.require_file(&target)?;

    let mut lines = TextLines::parse(&read_text(&target)?);
    let plan = patch::plan_patch(&lines.lines, &patch_text)
        .map_err(|e| invalid(format!("patch rejected: {}", e)))?;
    if plan.is_noop() {
        return Ok(format!(
            "patch matched '{}' with no changes",
            inv.display(&target)
        ));
    }

    let summary = plan.to_string();
    lines.lines = plan.lines;
    inv.backup(&exec.backups, &target)?;
    backup::atomic_write(&target, lines.render().as_bytes())?;
    Ok(format!("patched '{}': {}", inv.display(&target), summary))
}

fn run_external(exec: &Executor, command: &Command, inv: &mut Invocation<'_>) -> OpResult<String> {
    let line = match &command.raw_block {
        Some(block) => block.trim().to_string(),
        None => command.args.join(" ").trim().to_string(),
    };
    if line.is_empty() {
        return Err(invalid("usage: /cmd <command line>"));
    }

    let output = exec
        .runner
        .run(&line, inv.sandbox.root(), &exec.cancellation_token)?;
    if !output.stdout.trim().is_empty() {
        log::info!("/cmd stdout:\n{}", output.stdout.trim_end());
    }
    if !output.stderr.trim().is_empty() {
        log::warn!("/cmd stderr:\n{}", output.stderr.trim_end());
    }

    if output.success() {
        return Ok(format!("{:?} exited with status 0", line));
    }
    let tail: Vec<&str> = output.stderr.lines().rev().take(3).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    Err(OperationError::ProcessFailed(format!(
        "{:?} exited with {}{}",
        line,
        output
            .exit_code
            .map_or_else(|| "a signal".to_string(), |c| format!("status {}", c)),
        if tail.is_empty() {
            String::new()
        } else {
            format!(": {}", tail.join(" | "))
        }
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extensions::Extension;
    use regex::Regex;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        sandbox: Sandbox,
        clipboard: Clipboard,
        executor: Executor,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_settings(Settings::default())
        }

        fn with_settings(settings: Settings) -> Self {
            Self::with_extensions(settings, ExtensionRegistry::new())
        }

        fn with_extensions(settings: Settings, extensions: ExtensionRegistry) -> Self {
            let dir = tempdir().unwrap();
            let sandbox = Sandbox::new(dir.path()).unwrap();
            let executor =
                Executor::new(settings, extensions, Arc::new(AtomicBool::new(false))).unwrap();
            Self {
                _dir: dir,
                sandbox,
                clipboard: Clipboard::new(),
                executor,
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.sandbox.root().join(rel)
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.path(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.path(rel)).unwrap()
        }

        fn run(&mut self, name: &str, args: &[&str]) -> CommandOutcome {
            let command = Command::new(name, args.iter().map(|a| a.to_string()).collect());
            self.run_command(command)
        }

        fn run_command(&mut self, command: Command) -> CommandOutcome {
            self.executor
                .execute(&command, &self.sandbox, &mut self.clipboard, "test#0")
        }

        fn backups_of(&self, rel: &str) -> Vec<PathBuf> {
            let target = self.path(rel);
            let prefix = format!("{}.bak.", target.file_name().unwrap().to_string_lossy());
            fs::read_dir(target.parent().unwrap())
                .unwrap()
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(&prefix))
                .collect()
        }
    }

    #[test]
    fn test_create_file_rules() {
        let mut fx = Fixture::new();

        let created = fx.run("create_file", &["a.txt", "hello"]);
        assert_eq!(created.state, CommandState::Done);
        assert_eq!(fx.read("a.txt"), "hello");

        // Replaying the same command is a no-op.
        assert_eq!(fx.run("create_file", &["a.txt", "hello"]).state, CommandState::Done);

        let clash = fx.run("create_file", &["a.txt", "other"]);
        assert_eq!(clash.state, CommandState::Rejected);
        assert!(clash.detail.contains("/set"));
        assert_eq!(fx.read("a.txt"), "hello");

        assert_eq!(fx.run("create_script", &["nested/run.py"]).state, CommandState::Done);
        assert_eq!(fx.read("nested/run.py"), "");
    }

    #[test]
    fn test_create_file_sanitizes_and_checks_extension() {
        let mut fx = Fixture::new();
        let command = Command::new("create_file", vec!["main.py".to_string()])
            .with_block("print(1)\n/delete_file main.py\n");
        assert_eq!(fx.run_command(command).state, CommandState::Done);
        assert_eq!(fx.read("main.py"), "print(1)\n");

        let only_commands =
            Command::new("create_file", vec!["x.py".to_string()]).with_block("/cmd rm\n");
        assert_eq!(fx.run_command(only_commands).state, CommandState::Rejected);

        let outcome = fx.run("create_file", &["run.sh", "echo hi"]);
        assert_eq!(outcome.state, CommandState::Rejected);
        assert!(!fx.path("run.sh").exists());
    }

    #[test]
    fn test_sandbox_violation_is_rejected_without_side_effects() {
        let mut fx = Fixture::new();
        let outcome = fx.run("create_file", &["../escape.txt", "x"]);
        assert_eq!(outcome.state, CommandState::Rejected);
        assert!(!fx.sandbox.root().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn test_state_dir_is_reserved() {
        let mut fx = Fixture::new();
        fx.write(".filegenie/ledger.json", "{}");
        assert_eq!(
            fx.run("delete_file", &[".filegenie/ledger.json"]).state,
            CommandState::Rejected
        );
        assert_eq!(
            fx.run("create_file", &["./.filegenie/notes.txt", "x"]).state,
            CommandState::Rejected
        );
        assert_eq!(fx.read(".filegenie/ledger.json"), "{}");
    }

    #[test]
    fn test_create_folder_over_file_fails() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("create_folder", &["a/b"]).state, CommandState::Done);
        assert!(fx.path("a/b").is_dir());
        assert_eq!(fx.run("create_folder", &["a/b"]).state, CommandState::Done);

        fx.write("file.txt", "x");
        assert_eq!(fx.run("create_folder", &["file.txt"]).state, CommandState::Failed);
    }

    #[test]
    fn test_set_overwrites_and_discards_backup() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "old");
        assert_eq!(fx.run("set", &["a.txt", "new", "text"]).state, CommandState::Done);
        assert_eq!(fx.read("a.txt"), "new text");
        assert!(fx.backups_of("a.txt").is_empty());
    }

    #[test]
    fn test_set_keeps_backup_when_configured() {
        let mut fx = Fixture::with_settings(Settings {
            keep_backups: true,
            ..Settings::default()
        });
        fx.write("a.txt", "old");
        fx.run("set", &["a.txt", "new"]);
        let backups = fx.backups_of("a.txt");
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "old");
    }

    #[test]
    fn test_set_line_forms_and_range() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "1\n2\n3\n");

        assert_eq!(fx.run("set_line", &["2", "a.txt", "X"]).state, CommandState::Done);
        assert_eq!(fx.read("a.txt"), "1\nX\n3\n");

        assert_eq!(fx.run("set", &["line", "4", "a.txt", "four"]).state, CommandState::Done);
        assert_eq!(fx.read("a.txt"), "1\nX\n3\nfour\n");

        assert_eq!(fx.run("set_line", &["9", "a.txt", "nope"]).state, CommandState::Rejected);
        assert_eq!(fx.run("set_line", &["0", "a.txt", "nope"]).state, CommandState::Rejected);
        assert_eq!(fx.run("set_line", &["1", "missing.txt", "x"]).state, CommandState::Rejected);
        assert_eq!(fx.read("a.txt"), "1\nX\n3\nfour\n");
    }

    #[test]
    fn test_append_creates_and_extends() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("append", &["log.txt", "a"]).state, CommandState::Done);
        assert_eq!(fx.run("append", &["log.txt", "b"]).state, CommandState::Done);
        assert_eq!(fx.read("log.txt"), "ab");
        assert_eq!(fx.run("append", &["log.txt"]).state, CommandState::Rejected);
    }

    #[test]
    fn test_replace_counts_and_reports_noop() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "x-x-x");
        let outcome = fx.run("replace", &["a.txt", "x", "y"]);
        assert_eq!(outcome.state, CommandState::Done);
        assert!(outcome.detail.contains("3 occurrence"));
        assert_eq!(fx.read("a.txt"), "y-y-y");

        let noop = fx.run("replace", &["a.txt", "zzz", "q"]);
        assert_eq!(noop.state, CommandState::Done);
        assert!(noop.detail.contains("not found"));
        assert_eq!(fx.run("replace", &["nope.txt", "a", "b"]).state, CommandState::Rejected);
    }

    #[test]
    fn test_backups_survive_unsuccessful_outcomes() {
        // --- Setup ---
        let fx = Fixture::new();
        fx.write("a.txt", "before");
        let service = BackupService::new(false);
        let take = || service.backup(&fx.path("a.txt")).unwrap().unwrap();
        let command = Command::new("set", vec!["a.txt".to_string(), "after".to_string()]);
        let failure = || OperationError::Io {
            path: "a.txt".to_string(),
            source: std::io::Error::other("disk full"),
        };

        // --- Execute ---
        let failed = take();
        let outcome = fx
            .executor
            .settle(&command, vec![failed.clone()], Err(failure()), "test#0");
        let rejected = take();
        let rejected_outcome =
            fx.executor
                .settle(&command, vec![rejected.clone()], Err(invalid("bad")), "test#0");

        // --- Assert ---
        assert_eq!(outcome.state, CommandState::Failed);
        assert_eq!(rejected_outcome.state, CommandState::Rejected);
        assert!(failed.backup_path.exists());
        assert!(rejected.backup_path.exists());
        assert_eq!(fs::read_to_string(&failed.backup_path).unwrap(), "before");

        // A successful command discards its backup.
        let done = take();
        let done_outcome = fx
            .executor
            .settle(&command, vec![done.clone()], Ok("ok".to_string()), "test#0");
        assert_eq!(done_outcome.state, CommandState::Done);
        assert!(!done.backup_path.exists());
    }

    #[test]
    fn test_delete_file_always_keeps_backup() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "precious");
        assert_eq!(fx.run("delete_file", &["a.txt"]).state, CommandState::Done);
        assert!(!fx.path("a.txt").exists());

        let backups = fx.backups_of("a.txt");
        assert_eq!(backups.len(), 1);
        let name = backups[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(Regex::new(r"^a\.txt\.bak\.\d{14}$").unwrap().is_match(&name));
        assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "precious");

        assert_eq!(fx.run("delete_file", &["a.txt"]).state, CommandState::Rejected);
    }

    #[test]
    fn test_delete_folder_moves_to_trash_and_protects_root() {
        let mut fx = Fixture::new();
        fx.write("proj/src/main.py", "x");
        assert_eq!(fx.run("delete_folder", &["proj"]).state, CommandState::Done);
        assert!(!fx.path("proj").exists());
        let trashed: Vec<_> = fs::read_dir(fx.path(".trash")).unwrap().collect();
        assert_eq!(trashed.len(), 1);

        assert_eq!(fx.run("delete_folder", &["."]).state, CommandState::Rejected);
        assert_eq!(fx.run("delete_folder", &["ghost"]).state, CommandState::Rejected);
    }

    #[test]
    fn test_remove_line() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "1\n2\n3");
        assert_eq!(fx.run("remove_line", &["2", "a.txt"]).state, CommandState::Done);
        assert_eq!(fx.read("a.txt"), "1\n3");
        assert_eq!(fx.run("remove_line", &["3", "a.txt"]).state, CommandState::Rejected);
    }

    #[test]
    fn test_move_file_variants() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "A");
        fx.write("b.txt", "B");
        fs::create_dir_all(fx.path("dir")).unwrap();

        assert_eq!(fx.run("move_file", &["a.txt", "b.txt"]).state, CommandState::Done);
        assert_eq!(fx.read("b.txt"), "A");
        assert!(!fx.path("a.txt").exists());

        assert_eq!(fx.run("move_file", &["b.txt", "dir"]).state, CommandState::Done);
        assert_eq!(fx.read("dir/b.txt"), "A");

        assert_eq!(fx.run("move_file", &["ghost.txt", "x.txt"]).state, CommandState::Rejected);
        assert_eq!(fx.run("move_file", &["dir", "dir/inner"]).state, CommandState::Rejected);
    }

    #[test]
    fn test_copy_paste_uses_snapshot() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("paste_file", &["b.txt"]).state, CommandState::Rejected);

        fx.write("a.txt", "v1");
        assert_eq!(fx.run("copy_file", &["a.txt"]).state, CommandState::Done);
        fx.write("a.txt", "v2");
        assert_eq!(fx.run("paste_file", &["b.txt"]).state, CommandState::Done);
        assert_eq!(fx.read("b.txt"), "v1");
    }

    #[test]
    fn test_patch_all_or_nothing() {
        let mut fx = Fixture::new();
        fx.write("a.txt", "one\ntwo\nthree\n");

        let bad = Command::new("patch", vec!["a.txt".to_string()])
            .with_block("+zero\none\n-TWO\n");
        assert_eq!(fx.run_command(bad).state, CommandState::Rejected);
        assert_eq!(fx.read("a.txt"), "one\ntwo\nthree\n");
        assert!(fx.backups_of("a.txt").is_empty());

        let good = Command::new("patch", vec!["a.txt".to_string()])
            .with_block("one\n-two\n+2\n");
        let outcome = fx.run_command(good);
        assert_eq!(outcome.state, CommandState::Done);
        assert_eq!(fx.read("a.txt"), "one\n2\nthree\n");
    }

    #[test]
    fn test_cmd_not_whitelisted_is_rejected() {
        let mut fx = Fixture::new();
        let outcome = fx.run("cmd", &["rm -rf /"]);
        assert_eq!(outcome.state, CommandState::Rejected);
        assert!(outcome.detail.contains("whitelist"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cmd_non_zero_exit_fails() {
        let mut fx = Fixture::with_settings(Settings {
            whitelist_patterns: vec![r"^false$".to_string()],
            ..Settings::default()
        });
        assert_eq!(fx.run("cmd", &["false"]).state, CommandState::Failed);
    }

    #[test]
    fn test_unknown_command_and_extension_precedence() {
        struct Shout;
        impl Extension for Shout {
            fn handle(&self, _name: &str, args: &[String], _base: &Path) -> anyhow::Result<String> {
                Ok(args.join(" ").to_uppercase())
            }
        }

        let mut registry = ExtensionRegistry::new();
        registry.register("append", Box::new(Shout));
        let mut fx = Fixture::with_extensions(Settings::default(), registry);

        assert_eq!(fx.run("frobnicate", &[]).state, CommandState::Rejected);

        let outcome = fx.run("append", &["a.txt", "hi"]);
        assert_eq!(outcome.state, CommandState::Done);
        assert_eq!(outcome.detail, "A.TXT HI");
        assert!(!fx.path("a.txt").exists());
    }
}
