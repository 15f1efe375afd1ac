// EN: src/cli/handlers/parse.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    CancellationToken,
    cli::{args::ParseArgs, handlers::commons},
    core::parser,
};

/// Entry point for `filegenie parse`: a dry run that only reads the input.
pub fn handle(args: Vec<String>, _token: &CancellationToken) -> Result<()> {
    let parse_args = ParseArgs::try_parse_from(&args)?;
    let text = commons::read_message(&parse_args.message)?;
    let parsed = parser::parse(&text);

    if parsed.commands.is_empty() {
        println!("{}", "No commands found.".yellow());
    }
    for (i, command) in parsed.commands.iter().enumerate() {
        println!("{:>3}. {}", i + 1, format!("/{}", command.name).cyan().bold());
        for arg in &command.args {
            println!("       {} {:?}", "arg".dimmed(), arg);
        }
        if let Some(block) = &command.raw_block {
            println!("       {} ({} lines)", "block".dimmed(), block.lines().count());
            for line in block.lines() {
                println!("       {} {}", "│".dimmed(), line);
            }
        }
    }
    commons::print_warnings(&parsed.warnings);
    Ok(())
}
