// EN: src/constants.rs

/// The character that opens a command line inside a message.
pub const COMMAND_SIGIL: char = '/';

/// The delimiter that opens and closes a fenced multi-line payload.
pub const FENCE: &str = "```";

/// The name of the state directory kept next to a monitored folder or sandbox root.
pub const STATE_DIR: &str = ".filegenie";

/// The name of the idempotency ledger file (inside the state directory).
pub const LEDGER_FILENAME: &str = "ledger.json";

/// The name of the sandbox-local directory that receives deleted folders.
pub const TRASH_DIR: &str = ".trash";

/// The infix placed between a file name and its backup timestamp.
pub const BACKUP_INFIX: &str = ".bak.";

/// `strftime` pattern for backup and trash timestamps (`YYYYMMDDHHMMSS`).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// The name of the optional configuration file (in the user config dir).
pub const CONFIG_FILENAME: &str = "filegenie.toml";

/// Environment override for `keep_backups`.
pub const ENV_KEEP_BACKUPS: &str = "FILEGENIE_KEEP_BACKUPS";

/// Environment override for `cmd_timeout_seconds`.
pub const ENV_CMD_TIMEOUT: &str = "FILEGENIE_CMD_TIMEOUT_SECONDS";

/// Roles whose messages are scanned for commands.
pub const EXECUTABLE_ROLES: &[&str] = &["assistant", "system", "bot", "model"];

/// LM Studio's conversations folder, relative to the home directory.
pub const DEFAULT_CONVERSATIONS_DIR: &str = ".lmstudio/conversations";
