// EN: src/cli/args.rs
use clap::Parser;

/// Arguments of `filegenie watch`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)] // The action name has already been consumed by the dispatcher.
pub struct WatchArgs {
    /// Folder holding the conversation JSON files. Defaults to `~/.lmstudio/conversations`.
    #[arg(long)]
    pub folder: Option<String>,

    /// Watch a single conversation file instead of the whole folder.
    #[arg(long)]
    pub conv: Option<String>,

    /// Parent folder of the per-conversation sandboxes. Defaults to the current directory.
    #[arg(long)]
    pub workspace: Option<String>,

    /// Seconds between two scans of the folder.
    #[arg(long)]
    pub poll: Option<f64>,

    /// Path to a `filegenie.toml` configuration file.
    #[arg(long)]
    pub config: Option<String>,

    /// Keep backups even after a command succeeds.
    #[arg(long)]
    pub keep_backups: bool,
}

/// Arguments of `filegenie run`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct RunArgs {
    /// The message file to execute, or `-` to read it from stdin.
    pub message: String,

    /// The sandbox root every command is confined to.
    #[arg(long)]
    pub root: String,

    /// The message identity used by the ledger. Defaults to the file stem (or `stdin`).
    #[arg(long)]
    pub id: Option<String>,

    /// Path to a `filegenie.toml` configuration file.
    #[arg(long)]
    pub config: Option<String>,

    /// Keep backups even after a command succeeds.
    #[arg(long)]
    pub keep_backups: bool,
}

/// Arguments of `filegenie parse`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct ParseArgs {
    /// The message file to inspect, or `-` to read it from stdin.
    pub message: String,
}

/// Arguments of `filegenie backups`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct BackupsArgs {
    /// The folder to search.
    #[arg(long)]
    pub root: String,

    /// Delete what was found.
    #[arg(long)]
    pub purge: bool,
}
