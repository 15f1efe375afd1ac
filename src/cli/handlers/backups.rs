// EN: src/cli/handlers/backups.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    CancellationToken,
    cli::{args::BackupsArgs, handlers::commons},
    core::backup,
};

/// Entry point for `filegenie backups`: lists backup files and trashed folders,
/// deleting them with `--purge`.
pub fn handle(args: Vec<String>, token: &CancellationToken) -> Result<()> {
    let backups_args = BackupsArgs::try_parse_from(&args)?;
    let root = commons::existing_dir(&backups_args.root)?;

    let found = backup::find_recoverables(&root);
    if found.is_empty() {
        println!("{}", "Nothing to recover.".dimmed());
        return Ok(());
    }

    let mut purged = 0usize;
    for path in &found {
        let shown = path.strip_prefix(&root).unwrap_or(path).display();
        if !backups_args.purge {
            println!("  {}", shown);
            continue;
        }
        commons::check_for_cancellation(token)?;
        match backup::purge(path) {
            Ok(()) => {
                purged += 1;
                println!("  {} {}", "removed".red(), shown);
            }
            Err(e) => log::error!("{}", e),
        }
    }

    if backups_args.purge {
        println!("{} of {} entries purged.", purged, found.len());
    } else {
        println!("{} entries. Use --purge to delete them.", found.len());
    }
    Ok(())
}
