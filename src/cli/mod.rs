// EN: src/cli/mod.rs

use clap::Parser;

/// One clap struct per action.
pub mod args;
/// One handler per action.
pub mod handlers;

const HELP_TEMPLATE: &str = "\
<title>filegenie {version}</title>
Executes file commands written in chat messages, inside a sandbox folder.

<group>USAGE</group>
  filegenie <cmd><action></cmd> [options]

<group>ACTIONS</group>
  <cmd>watch</cmd>    Watch LM Studio conversations and run new assistant messages
  <cmd>run</cmd>      Run one message file (or <hl>-</hl> for stdin) against a root folder
  <cmd>parse</cmd>    Show the commands a message contains, without running them
  <cmd>backups</cmd>  List (or <err>--purge</err>) backup files and trashed folders

<group>MESSAGE COMMANDS</group>
  {commands}

<dim>Use `filegenie <action> --help` for the options of an action.
Set RUST_LOG=debug for detailed logs.</dim>
";

/// Builds the color-aware help string at runtime.
fn build_help_string() -> &'static str {
    let use_colors = colored::control::SHOULD_COLORIZE.should_colorize();

    let title = if use_colors { "\x1b[1;33m" } else { "" }; // Bold Yellow
    let hl = if use_colors { "\x1b[1;36m" } else { "" }; // Bold Cyan
    let cmd = if use_colors { "\x1b[36m" } else { "" }; // Cyan
    let group = if use_colors { "\x1b[1;32m" } else { "" }; // Bold Green
    let err = if use_colors { "\x1b[91m" } else { "" }; // Bright Red
    let dim = if use_colors { "\x1b[2m" } else { "" };
    let reset = if use_colors { "\x1b[0m" } else { "" };

    let commands = crate::core::operations::builtin_command_names()
        .iter()
        .map(|name| format!("/{}", name))
        .collect::<Vec<_>>()
        .join(" ");

    let formatted_string = HELP_TEMPLATE
        .replace("{commands}", &commands)
        .replace("<title>", title)
        .replace("</title>", reset)
        .replace("<hl>", hl)
        .replace("</hl>", reset)
        .replace("<cmd>", cmd)
        .replace("</cmd>", reset)
        .replace("<group>", group)
        .replace("</group>", reset)
        .replace("<err>", err)
        .replace("</err>", reset)
        .replace("<dim>", dim)
        .replace("</dim>", reset);

    Box::leak(formatted_string.into_boxed_str())
}

/// filegenie: runs file commands found in chat messages, confined to a sandbox.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    help_template = { build_help_string() },
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// The action to perform (`watch`, `run`, `parse`, `backups`).
    pub action: Option<String>,

    /// Everything after the action; parsed by the action's own handler.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
