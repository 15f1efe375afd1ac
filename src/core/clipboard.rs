// EN: src/core/clipboard.rs

use std::path::{Path, PathBuf};

/// The single value held by the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSlot {
    /// Bytes read at copy time.
    pub content: Vec<u8>,
    /// The file they were read from.
    pub origin_path: PathBuf,
}

/// Single-slot, in-memory store for `/copy_file` and `/paste_file`.
/// Each copy overwrites the slot; a paste reads it without clearing it.
#[derive(Debug, Default)]
pub struct Clipboard {
    slot: Option<ClipboardSlot>,
}

impl Clipboard {
    /// An empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current value.
    pub fn copy(&mut self, origin_path: &Path, content: Vec<u8>) {
        log::debug!(
            "Clipboard now holds {} bytes from {}",
            content.len(),
            origin_path.display()
        );
        self.slot = Some(ClipboardSlot {
            content,
            origin_path: origin_path.to_path_buf(),
        });
    }

    /// The current value, if any.
    pub fn peek(&self) -> Option<&ClipboardSlot> {
        self.slot.as_ref()
    }
}
