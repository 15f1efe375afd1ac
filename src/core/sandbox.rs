// EN: src/core/sandbox.rs

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Why a path was refused by the sandbox.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The root handed to [`Sandbox::new`] could not be canonicalized.
    #[error("Sandbox root '{path}' is not accessible: {source}")]
    InvalidRoot {
        /// Path the error is about.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The root exists but is not a directory.
    #[error("Sandbox root '{0}' is not a directory.")]
    RootNotADirectory(String),
    /// A path argument was blank.
    #[error("Path argument is empty.")]
    EmptyPath,
    /// The candidate resolves (lexically or through links) outside the root.
    #[error("Path '{candidate}' escapes the sandbox root '{root}'.")]
    Escape {
        /// The path as given in the command.
        candidate: String,
        /// The sandbox root.
        root: String,
    },
    /// A link on the way to the candidate could not be followed.
    #[error("Path '{candidate}' could not be resolved: {source}")]
    Unresolvable {
        /// The path as given in the command.
        candidate: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A directory tree that every file operation of a conversation is confined to.
///
/// The root is canonicalized once at construction; every resolved path is checked
/// against that canonical form, so `..`, absolute overrides and symbolic links that
/// point outside the tree are all rejected rather than clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Opens a sandbox rooted at an existing directory.
    pub fn new(root: &Path) -> Result<Self, SandboxError> {
        let canonical = dunce::canonicalize(root).map_err(|e| SandboxError::InvalidRoot {
            path: root.display().to_string(),
            source: e,
        })?;
        if !canonical.is_dir() {
            return Err(SandboxError::RootNotADirectory(
                canonical.display().to_string(),
            ));
        }
        Ok(Self { root: canonical })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a user-supplied path against the root.
    ///
    /// # Arguments
    /// * `candidate` - A relative path (`src/main.py`), or an absolute path that already
    ///   lies under the root. Backslashes are treated as separators.
    ///
    /// # Returns
    /// An absolute path whose existing portion is canonical and lies under the root.
    /// Components that do not exist yet (a file about to be created) are appended
    /// to the canonical form of the deepest existing ancestor.
    ///
    /// # Errors
    /// `SandboxError::Escape` for any escape, `EmptyPath` for blank input and
    /// `Unresolvable` for dangling links. No filesystem state is modified.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf, SandboxError> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(SandboxError::EmptyPath);
        }
        let normalized = trimmed.replace('\\', "/");
        let raw = Path::new(&normalized);

        // 1. Lexical pass: anchor relative paths at the root and fold `.` / `..`.
        let is_absolute = raw.is_absolute();
        let anchored = if is_absolute {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let lexical = normalize_lexically(&anchored).ok_or_else(|| self.escape(candidate))?;
        if !is_absolute && !lexical.starts_with(&self.root) {
            return Err(self.escape(candidate));
        }

        // 2. Walk up to the deepest ancestor that exists (without following the last link).
        let mut existing = lexical;
        let mut missing: Vec<OsString> = Vec::new();
        loop {
            match fs::symlink_metadata(&existing) {
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                        return Err(self.escape(candidate));
                    };
                    missing.push(name);
                    if !existing.pop() {
                        return Err(self.escape(candidate));
                    }
                }
                Err(e) => {
                    return Err(SandboxError::Unresolvable {
                        candidate: candidate.to_string(),
                        source: e,
                    });
                }
            }
        }

        // 3. Canonical pass: links are followed here, so a link pointing outside fails.
        let canonical =
            dunce::canonicalize(&existing).map_err(|e| SandboxError::Unresolvable {
                candidate: candidate.to_string(),
                source: e,
            })?;
        if !canonical.starts_with(&self.root) {
            log::debug!(
                "'{}' canonicalizes to '{}', outside '{}'",
                candidate,
                canonical.display(),
                self.root.display()
            );
            return Err(self.escape(candidate));
        }

        let resolved = missing
            .into_iter()
            .rev()
            .fold(canonical, |acc, part| acc.join(part));
        log::trace!("Resolved '{}' -> '{}'", candidate, resolved.display());
        Ok(resolved)
    }

    /// Returns the path relative to the root, for messages and trash names.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    fn escape(&self, candidate: &str) -> SandboxError {
        SandboxError::Escape {
            candidate: candidate.to_string(),
            root: self.root.display().to_string(),
        }
    }
}

/// Folds `.` and `..` without touching the filesystem.
/// Returns `None` when `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_relative_path_resolves_under_root() {
        let (_dir, sb) = sandbox();
        let resolved = sb.resolve("src/main.py").unwrap();
        assert_eq!(resolved, sb.root().join("src").join("main.py"));
    }

    #[test]
    fn test_inner_parent_dir_is_folded() {
        let (_dir, sb) = sandbox();
        let resolved = sb.resolve("a/b/../c.txt").unwrap();
        assert_eq!(resolved, sb.root().join("a").join("c.txt"));
    }

    #[test]
    fn test_traversal_escape_is_rejected() {
        let (_dir, sb) = sandbox();
        for candidate in ["../x.txt", "a/../../x.txt", "..\\..\\x.txt", "./../../etc/passwd"] {
            let result = sb.resolve(candidate);
            assert!(
                matches!(result, Err(SandboxError::Escape { .. })),
                "'{}' should escape, got {:?}",
                candidate,
                result
            );
        }
    }

    #[test]
    fn test_absolute_path_outside_root_is_rejected() {
        let (_dir, sb) = sandbox();
        let other = tempdir().unwrap();
        let outside = other.path().join("victim.txt");
        let result = sb.resolve(outside.to_str().unwrap());
        assert!(matches!(result, Err(SandboxError::Escape { .. })));
    }

    #[test]
    fn test_absolute_path_inside_root_is_accepted() {
        let (_dir, sb) = sandbox();
        let inside = sb.root().join("notes.md");
        let resolved = sb.resolve(inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let (_dir, sb) = sandbox();
        assert!(matches!(sb.resolve("   "), Err(SandboxError::EmptyPath)));
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            Sandbox::new(&file),
            Err(SandboxError::RootNotADirectory(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_pointing_outside_is_rejected() {
        let (_dir, sb) = sandbox();
        let outside = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), sb.root().join("escape")).unwrap();

        // Both an existing-through-link path and a not-yet-existing one are refused.
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        assert!(matches!(
            sb.resolve("escape/secret.txt"),
            Err(SandboxError::Escape { .. })
        ));
        assert!(matches!(
            sb.resolve("escape/new/file.txt"),
            Err(SandboxError::Escape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_is_followed() {
        let (_dir, sb) = sandbox();
        fs::create_dir(sb.root().join("real")).unwrap();
        std::os::unix::fs::symlink(sb.root().join("real"), sb.root().join("alias")).unwrap();
        let resolved = sb.resolve("alias/file.txt").unwrap();
        assert_eq!(resolved, sb.root().join("real").join("file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_unresolvable() {
        let (_dir, sb) = sandbox();
        std::os::unix::fs::symlink("/definitely/not/here", sb.root().join("dangling")).unwrap();
        assert!(matches!(
            sb.resolve("dangling"),
            Err(SandboxError::Unresolvable { .. })
        ));
    }
}
