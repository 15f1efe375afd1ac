// EN: src/core/ledger.rs

use crate::{
    constants::{LEDGER_FILENAME, STATE_DIR},
    core::backup::{self, BackupError},
    models::LedgerEntry,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// On-disk format version written into every ledger file.
const LEDGER_VERSION: u32 = 1;

/// Represents errors that can occur while loading or saving the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger file exists but could not be read.
    #[error("Could not read ledger '{path}': {source}")]
    Read {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The ledger file is not valid JSON for this format. Never reset silently:
    /// an empty ledger would re-execute every message already seen.
    #[error("Ledger '{path}' is corrupt: {source}. Move it aside to start over.")]
    Corrupt {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The ledger was written by an incompatible version.
    #[error("Ledger '{path}' has unsupported version {found} (expected {}).", LEDGER_VERSION)]
    UnsupportedVersion {
        /// Path the error is about.
        path: String,
        /// The version stored in the file.
        found: u32,
    },
    /// Serializing the in-memory ledger failed.
    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Replacing the ledger file failed.
    #[error("Failed to write ledger: {0}")]
    Write(#[from] BackupError),
}

type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct LedgerFile {
    version: u32,
    entries: BTreeMap<String, LedgerEntry>,
}

/// Hex-encoded blake3 digest of a message's raw text.
pub fn content_hash(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}

/// Durable record of which message contents have already been executed.
///
/// Loaded once, before the worker starts; every `mark_processed` rewrites the whole
/// file through an atomic replace, so a crash never leaves a half-written ledger and
/// concurrent readers only ever see a complete old or new version.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    /// The default ledger location for a monitored folder or sandbox root.
    pub fn default_path(base: &Path) -> PathBuf {
        base.join(STATE_DIR).join(LEDGER_FILENAME)
    }

    /// Loads the ledger from `path`; a missing file yields an empty ledger.
    ///
    /// # Errors
    /// `LedgerError::Corrupt` / `UnsupportedVersion` if the file exists but cannot
    /// be trusted, `LedgerError::Read` on I/O failure.
    pub fn load(path: &Path) -> LedgerResult<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No ledger at '{}', starting empty.", path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    entries: BTreeMap::new(),
                });
            }
            Err(e) => {
                return Err(LedgerError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        let file: LedgerFile =
            serde_json::from_slice(&bytes).map_err(|e| LedgerError::Corrupt {
                path: path.display().to_string(),
                source: e,
            })?;
        if file.version != LEDGER_VERSION {
            return Err(LedgerError::UnsupportedVersion {
                path: path.display().to_string(),
                found: file.version,
            });
        }

        log::info!(
            "Loaded ledger '{}' with {} processed message(s).",
            path.display(),
            file.entries.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            entries: file.entries,
        })
    }

    /// Where this ledger is persisted.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of messages recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry recorded for a message id.
    pub fn get(&self, message_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(message_id)
    }

    /// `true` iff this exact content of this message was already executed.
    pub fn has_processed(&self, message_id: &str, content_hash: &str) -> bool {
        self.entries
            .get(message_id)
            .is_some_and(|entry| entry.content_hash == content_hash)
    }

    /// Records a message content as executed and persists the ledger.
    pub fn mark_processed(&mut self, message_id: &str, content_hash: &str) -> LedgerResult<()> {
        let processed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.entries.insert(
            message_id.to_string(),
            LedgerEntry {
                content_hash: content_hash.to_string(),
                processed_at,
            },
        );
        self.flush()
    }

    /// Writes the full ledger to disk (read-then-replace, never append).
    pub fn flush(&self) -> LedgerResult<()> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        backup::atomic_write(&self.path, &json)?;
        log::trace!("Ledger flushed to '{}'", self.path.display());
        Ok(())
    }
}
