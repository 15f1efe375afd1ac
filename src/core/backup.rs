// EN: src/core/backup.rs

use crate::{
    constants::{BACKUP_INFIX, TIMESTAMP_FORMAT, TRASH_DIR},
    core::sandbox::Sandbox,
    models::BackupRecord,
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use lazy_static::lazy_static;
use regex::Regex;
use tempfile::NamedTempFile;
use thiserror::Error;
use walkdir::WalkDir;

lazy_static! {
    /// `<name>.bak.<YYYYMMDDHHMMSS>`, optionally with the `-N` collision suffix.
    static ref BACKUP_NAME_REGEX: Regex =
        Regex::new(r"^.+\.bak\.\d{14}(-\d+)?$").expect("Invalid regex for backup names");
}

/// Errors from backups, atomic writes and the trash.
#[derive(Error, Debug)]
pub enum BackupError {
    /// A filesystem call failed on a specific path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The staged temporary file could not be renamed over the destination.
    #[error("Could not replace '{path}' atomically: {source}")]
    Persist {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: tempfile::PersistError,
    },
    /// The path has no parent directory or no final component.
    #[error("Path '{0}' has no usable parent directory or file name.")]
    BadPath(String),
}

type BackupResult<T> = Result<T, BackupError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Returns the current local time as `YYYYMMDDHHMMSS`.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Takes backups before destructive mutations and performs atomic replacement writes.
#[derive(Debug, Clone, Copy)]
pub struct BackupService {
    keep_backups: bool,
}

impl BackupService {
    /// Creates the service. With `keep_backups = false`, [`BackupService::discard`]
    /// deletes a backup; callers only call it once their command has succeeded.
    pub fn new(keep_backups: bool) -> Self {
        Self { keep_backups }
    }

    /// Whether successful commands keep their backups.
    pub fn keeps_backups(&self) -> bool {
        self.keep_backups
    }

    /// Copies `path` to `<path>.bak.<timestamp>` next to it.
    ///
    /// Returns `Ok(None)` when there is nothing to back up (the path does not exist
    /// or is not a regular file). Two backups in the same second get a `-N` suffix
    /// instead of overwriting each other.
    pub fn backup(&self, path: &Path) -> BackupResult<Option<BackupRecord>> {
        if !path.is_file() {
            return Ok(None);
        }
        let file_name = path
            .file_name()
            .ok_or_else(|| BackupError::BadPath(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();
        let stamp = timestamp();
        let base = format!("{}{}{}", file_name, BACKUP_INFIX, stamp);
        let backup_path = unique_sibling(path, &base);

        fs::copy(path, &backup_path).map_err(io_err(&backup_path))?;
        log::info!("Backup created: {}", backup_path.display());
        Ok(Some(BackupRecord {
            original_path: path.to_path_buf(),
            backup_path,
            timestamp: stamp,
        }))
    }

    /// Removes a backup after its command completed, unless backups are kept.
    /// Failure to remove is logged, never propagated: the command already succeeded.
    pub fn discard(&self, record: &BackupRecord) {
        if self.keep_backups {
            return;
        }
        match fs::remove_file(&record.backup_path) {
            Ok(()) => log::debug!("Backup discarded: {}", record.backup_path.display()),
            Err(e) => log::warn!(
                "Could not remove backup '{}': {}",
                record.backup_path.display(),
                e
            ),
        }
    }
}

/// A fully written and flushed temporary file waiting to replace its destination.
///
/// Dropping it without calling [`StagedWrite::commit`] deletes the temporary file and
/// leaves the destination exactly as it was.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    destination: PathBuf,
}

impl StagedWrite {
    /// Writes `content` to a sibling temporary file of `destination`.
    /// Creates missing parent directories.
    pub fn stage(destination: &Path, content: &[u8]) -> BackupResult<Self> {
        let dir = destination
            .parent()
            .ok_or_else(|| BackupError::BadPath(destination.display().to_string()))?;
        fs::create_dir_all(dir).map_err(io_err(dir))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
        temp.write_all(content).map_err(io_err(destination))?;
        temp.as_file().sync_all().map_err(io_err(destination))?;

        // Keep the permissions of the file being replaced.
        if let Ok(meta) = fs::metadata(destination) {
            fs::set_permissions(temp.path(), meta.permissions()).map_err(io_err(destination))?;
        }

        Ok(Self {
            temp,
            destination: destination.to_path_buf(),
        })
    }

    /// Renames the temporary file over the destination.
    pub fn commit(self) -> BackupResult<()> {
        let destination = self.destination;
        self.temp
            .persist(&destination)
            .map_err(|e| BackupError::Persist {
                path: destination.display().to_string(),
                source: e,
            })?;
        Ok(())
    }
}

/// Replaces `path` with `content` via temp-file-then-rename.
/// Either the whole new content is visible afterwards, or the old file is untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> BackupResult<()> {
    StagedWrite::stage(path, content)?.commit()?;
    log::debug!("Atomically wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Moves a folder into `<root>/.trash/<timestamp>-<name>` instead of deleting it.
///
/// # Returns
/// The trash location of the moved subtree.
pub fn move_to_trash(sandbox: &Sandbox, folder: &Path) -> BackupResult<PathBuf> {
    let name = folder
        .file_name()
        .ok_or_else(|| BackupError::BadPath(folder.display().to_string()))?
        .to_string_lossy()
        .into_owned();
    let trash = sandbox.root().join(TRASH_DIR);
    fs::create_dir_all(&trash).map_err(io_err(&trash))?;

    let destination = unique_sibling(
        &trash.join("placeholder"),
        &format!("{}-{}", timestamp(), name),
    );
    fs::rename(folder, &destination).map_err(io_err(folder))?;
    log::info!(
        "Folder moved to trash: {} -> {}",
        folder.display(),
        destination.display()
    );
    Ok(destination)
}

/// Lists backup files and trash entries below a root, sorted by path.
/// The trash directory itself is reported once per entry, not recursed into.
pub fn find_recoverables(root: &Path) -> Vec<PathBuf> {
    let trash = root.join(TRASH_DIR);
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.path().parent() != Some(trash.as_path()) || e.depth() == 0)
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                log::debug!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_backup_name(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();

    if let Ok(entries) = fs::read_dir(&trash) {
        found.extend(entries.filter_map(Result::ok).map(|e| e.path()));
    }
    found.sort();
    found
}

/// Whether `file_name` is one of the names [`BackupService::backup`] produces.
pub fn is_backup_name(file_name: &str) -> bool {
    BACKUP_NAME_REGEX.is_match(file_name)
}

/// Deletes a backup file or a trashed subtree.
pub fn purge(path: &Path) -> BackupResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(io_err(path))
}

/// Picks `<dir of sibling>/<base>`, or `<base>-N` if that name is taken.
fn unique_sibling(sibling: &Path, base: &str) -> PathBuf {
    let dir = sibling.parent().unwrap_or_else(|| Path::new("."));
    let first = dir.join(base);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{}-{}", base, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}
